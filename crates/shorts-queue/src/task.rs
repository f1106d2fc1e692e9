//! Task payloads carried by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shorts_models::JobId;

/// Run the pipeline for one job.
///
/// The payload carries only the job id; workers read everything else from the
/// store so a redelivered task always sees current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessJobTask {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessJobTask {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Deduplication key: one in-flight task per job.
    pub fn dedup_key(&self) -> String {
        self.job_id.to_string()
    }
}

/// A task handed to a consumer, not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend message identifier
    pub message_id: String,
    /// Dedup key the task was submitted under
    pub dedup_key: String,
    pub task: ProcessJobTask,
    /// 1 for the first delivery, incremented per failed attempt
    pub attempt: u32,
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new task was added.
    Enqueued { message_id: String },
    /// A task with the same dedup key is already in flight; nothing was added.
    Duplicate,
}

impl SubmitOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SubmitOutcome::Duplicate)
    }
}

/// Result of reporting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// The task will be delivered again.
    Retrying { attempt: u32 },
    /// Retries are exhausted; the task moved to the dead-letter queue.
    DeadLettered,
}
