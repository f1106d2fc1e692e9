//! Lifecycle logging for job attempts.
//!
//! Every event carries `job_id` and `attempt`, plus the public `token` once
//! the job row has been read. Status changes are emitted with `from`/`to`
//! fields so a single job can be followed across workers and redeliveries
//! with one filter.

use std::fmt::Debug;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Span};

use shorts_models::{JobId, JobStatus, JobToken};

/// Logger bound to one attempt of one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    attempt: u32,
    token: Option<JobToken>,
    stage: Option<String>,
}

impl JobLogger {
    pub fn new(job_id: JobId, attempt: u32) -> Self {
        Self {
            job_id,
            attempt,
            token: None,
            stage: None,
        }
    }

    pub fn with_token(mut self, token: JobToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Logger handed to a pipeline stage; events are tagged with its name.
    pub fn for_stage(&self, stage: &str) -> Self {
        Self {
            stage: Some(stage.to_string()),
            ..self.clone()
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn token(&self) -> Option<&JobToken> {
        self.token.as_ref()
    }

    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    fn token_field(&self) -> &str {
        self.token.as_ref().map(JobToken::as_str).unwrap_or("")
    }

    /// Span covering the whole attempt.
    pub fn span(&self) -> Span {
        info_span!("job_attempt", job_id = %self.job_id, attempt = self.attempt)
    }

    /// The job moved into `processing` and `stage` is about to run.
    pub fn started(&self, stage: &str, input_key: &str) {
        info!(
            job_id = %self.job_id,
            token = self.token_field(),
            attempt = self.attempt,
            to = %JobStatus::Processing,
            stage,
            input_key,
            "Job processing"
        );
    }

    pub fn done(&self, artifacts: usize, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            token = self.token_field(),
            attempt = self.attempt,
            from = %JobStatus::Processing,
            to = %JobStatus::Done,
            artifacts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job done"
        );
    }

    pub fn failed(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            token = self.token_field(),
            attempt = self.attempt,
            from = %JobStatus::Processing,
            to = %JobStatus::Failed,
            error = message,
            "Job failed"
        );
    }

    /// The task was acknowledged without running the stage.
    pub fn dropped(&self, reason: impl Debug) {
        warn!(
            job_id = %self.job_id,
            attempt = self.attempt,
            ?reason,
            "Task dropped"
        );
    }

    /// Stage progress; debug level so long stages stay quiet by default.
    pub fn progress(&self, message: &str) {
        debug!(
            job_id = %self.job_id,
            attempt = self.attempt,
            stage = self.stage.as_deref().unwrap_or(""),
            "{}", message
        );
    }

    pub fn warn(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            token = self.token_field(),
            attempt = self.attempt,
            "{}", message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_attached_after_read() {
        let job_id = JobId::new();
        let logger = JobLogger::new(job_id, 2);
        assert!(logger.token().is_none());
        assert_eq!(logger.token_field(), "");

        let token = JobToken::generate();
        let logger = logger.with_token(token.clone());
        assert_eq!(logger.token(), Some(&token));
        assert_eq!(logger.token_field(), token.as_str());
        assert_eq!(logger.attempt(), 2);
    }

    #[test]
    fn test_stage_logger_keeps_attempt_context() {
        let job_id = JobId::new();
        let token = JobToken::generate();
        let logger = JobLogger::new(job_id, 3).with_token(token.clone());

        let stage = logger.for_stage("simulated");
        assert_eq!(stage.stage(), Some("simulated"));
        assert_eq!(stage.job_id(), &job_id);
        assert_eq!(stage.token(), Some(&token));
        assert_eq!(stage.attempt(), 3);
        assert!(logger.stage().is_none());
    }
}
