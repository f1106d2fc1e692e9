//! In-process store backend.
//!
//! Same semantics as the PostgreSQL backend, with a single mutex standing in
//! for row-level atomicity. Used by tests and single-process local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use shorts_models::{Artifact, Job, JobId, JobStatus, JobToken, NewArtifact};

use crate::error::{StoreError, StoreResult};
use crate::store::{AttachOutcome, JobStore};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    tokens: HashMap<String, JobId>,
    artifacts: HashMap<JobId, Vec<Artifact>>,
}

/// Mutex-guarded in-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job as-is. Lets tests seed arbitrary states and timestamps.
    pub async fn insert_job(&self, job: Job) {
        let mut state = self.state.lock().await;
        state.tokens.insert(job.token.as_str().to_string(), job.id);
        state.jobs.insert(job.id, job);
    }

    /// Insert an artifact with an explicit creation time.
    pub async fn insert_artifact_at(
        &self,
        job_id: &JobId,
        artifact: NewArtifact,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Artifact> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(job_id) {
            return Err(StoreError::not_found(job_id.to_string()));
        }
        let artifact = artifact.into_artifact(*job_id, created_at);
        state
            .artifacts
            .entry(*job_id)
            .or_default()
            .push(artifact.clone());
        Ok(artifact)
    }

    /// Number of jobs held.
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self) -> StoreResult<Job> {
        let mut state = self.state.lock().await;

        let mut job = Job::new();
        let mut attempts = 1;
        while state.tokens.contains_key(job.token.as_str()) {
            if attempts >= 3 {
                return Err(StoreError::TokenCollision(attempts));
            }
            job.token = JobToken::generate();
            attempts += 1;
        }

        state.tokens.insert(job.token.as_str().to_string(), job.id);
        state.jobs.insert(job.id, job.clone());
        debug!(job_id = %job.id, "Created job");
        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(id).cloned())
    }

    async fn get_job_by_token(&self, token: &JobToken) -> StoreResult<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .get(token.as_str())
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn attach_input(&self, token: &JobToken, input_key: &str) -> StoreResult<AttachOutcome> {
        let mut state = self.state.lock().await;
        let id = *state
            .tokens
            .get(token.as_str())
            .ok_or_else(|| StoreError::not_found(token.as_str()))?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(token.as_str()))?;

        match job.input_key.as_deref() {
            Some(existing) if existing == input_key => Ok(AttachOutcome::Unchanged),
            Some(existing) => Err(StoreError::AlreadyAttached {
                existing: existing.to_string(),
            }),
            None => {
                job.input_key = Some(input_key.to_string());
                job.updated_at = Utc::now();
                Ok(AttachOutcome::Attached)
            }
        }
    }

    async fn compare_and_set_status(
        &self,
        id: &JobId,
        expected: &[JobStatus],
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(id) {
            Some(job) if expected.contains(&job.status) => {
                job.status = status;
                job.error = error.map(str::to_string);
                job.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn set_status(&self, id: &JobId, status: JobStatus, error: Option<&str>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(id) {
            Some(job) => {
                job.status = status;
                job.error = error.map(str::to_string);
                job.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_artifact(&self, job_id: &JobId, artifact: NewArtifact) -> StoreResult<Artifact> {
        self.insert_artifact_at(job_id, artifact, Utc::now()).await
    }

    async fn list_artifacts(&self, job_id: &JobId) -> StoreResult<Vec<Artifact>> {
        let state = self.state.lock().await;
        let mut artifacts = state.artifacts.get(job_id).cloned().unwrap_or_default();
        artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(artifacts)
    }

    async fn list_stale_jobs(
        &self,
        statuses: &[JobStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut stale: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| statuses.contains(&job.status) && job.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
