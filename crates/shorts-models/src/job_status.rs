//! Job lifecycle status.
//!
//! ```text
//! created --queue--> queued --pickup--> processing --success--> done
//!                      ^                    |
//!                      |                 failure
//!                      +------queue------ failed
//! ```
//!
//! `queued --queue--> queued` is an idempotent re-entry, not a real move.
//! `processing` and `done` are never re-entered through the queue operation.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job exists, input may not be attached yet
    #[default]
    Created,
    /// A task for this job has been handed to the queue
    Queued,
    /// A worker is running the pipeline stage
    Processing,
    /// Pipeline finished successfully
    Done,
    /// Pipeline or enqueue failed; `error` holds the reason
    Failed,
}

impl JobStatus {
    /// States from which the client-facing queue operation may proceed.
    pub const QUEUEABLE: [JobStatus; 3] = [JobStatus::Created, JobStatus::Queued, JobStatus::Failed];

    /// States a delivered task may move into `processing` from.
    ///
    /// `processing` covers redelivery after a worker crash, `failed` covers
    /// queue-driven retries.
    pub const RUNNABLE: [JobStatus; 3] = [JobStatus::Queued, JobStatus::Processing, JobStatus::Failed];

    /// All states, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Created,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected without a re-queue).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether the queue operation is allowed from this state.
    pub fn is_queueable(&self) -> bool {
        Self::QUEUEABLE.contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a persisted status string is not one of the five states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status: {0}")]
pub struct ParseJobStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ParseJobStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("completed".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_queueable_states() {
        assert!(JobStatus::Created.is_queueable());
        assert!(JobStatus::Queued.is_queueable());
        assert!(JobStatus::Failed.is_queueable());
        assert!(!JobStatus::Processing.is_queueable());
        assert!(!JobStatus::Done.is_queueable());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
        let parsed: JobStatus = serde_json::from_str("\"done\"").unwrap();
        assert_eq!(parsed, JobStatus::Done);
    }
}
