//! Job record store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shorts_models::{Artifact, Job, JobId, JobStatus, JobToken, NewArtifact};

use crate::error::StoreResult;

/// Outcome of a successful `attach_input` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The key was written.
    Attached,
    /// The same key was already attached; nothing changed.
    Unchanged,
}

/// Durable ledger of jobs and artifacts.
///
/// The store applies no lifecycle policy of its own. Every write bumps
/// `updated_at`. `compare_and_set_status` is the only operation that must be a
/// single atomic test-and-set; callers rely on it to linearize transitions into
/// `queued`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `created` with a fresh unique token.
    async fn create_job(&self) -> StoreResult<Job>;

    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>>;

    async fn get_job_by_token(&self, token: &JobToken) -> StoreResult<Option<Job>>;

    /// Set the input key once.
    ///
    /// Fails with `NotFound` for an unknown token and `AlreadyAttached` when a
    /// different key is already set. Re-attaching the same key is a no-op.
    async fn attach_input(&self, token: &JobToken, input_key: &str) -> StoreResult<AttachOutcome>;

    /// Atomically set `status` (and `error`) only if the current status is one
    /// of `expected`. Returns the number of rows affected (0 or 1).
    async fn compare_and_set_status(
        &self,
        id: &JobId,
        expected: &[JobStatus],
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<u64>;

    /// Set `status` (and `error`) for an existing job regardless of its current
    /// status. Returns the number of rows affected (0 when the job is missing).
    async fn set_status(&self, id: &JobId, status: JobStatus, error: Option<&str>) -> StoreResult<u64>;

    async fn insert_artifact(&self, job_id: &JobId, artifact: NewArtifact) -> StoreResult<Artifact>;

    /// Artifacts of a job in ascending `created_at` order, ties broken by id.
    async fn list_artifacts(&self, job_id: &JobId) -> StoreResult<Vec<Artifact>>;

    /// Jobs in one of `statuses` whose last write is older than `older_than`.
    async fn list_stale_jobs(
        &self,
        statuses: &[JobStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Job>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}
