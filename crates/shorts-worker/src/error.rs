//! Worker error types.

use std::time::Duration;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Pipeline failed: {0}")]
    Pipeline(String),

    #[error("Pipeline timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("job has no input attached")]
    NoInput,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] shorts_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] shorts_queue::QueueError),
}

impl WorkerError {
    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Message persisted on the job when this error fails an attempt.
    pub fn job_message(&self) -> String {
        match self {
            WorkerError::Pipeline(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_messages() {
        assert_eq!(WorkerError::pipeline("decoder crashed").job_message(), "decoder crashed");
        assert_eq!(WorkerError::NoInput.job_message(), "job has no input attached");
        assert_eq!(
            WorkerError::Timeout(Duration::from_secs(90)).job_message(),
            "Pipeline timed out after 90s"
        );
    }
}
