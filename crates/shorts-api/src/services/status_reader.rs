//! Job status reads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use shorts_models::{Artifact, ArtifactId, JobStatus, JobToken};
use shorts_storage::UploadBroker;
use shorts_store::JobStore;

use crate::error::{ApiError, ApiResult};

/// Client view of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub token: JobToken,
    pub status: JobStatus,
    pub input_key: Option<String>,
    pub error: Option<String>,
    pub artifacts: Vec<ArtifactView>,
}

/// Artifact with a freshly signed download URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactView {
    pub id: ArtifactId,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub key: String,
    pub title: Option<String>,
    pub start_sec: Option<i32>,
    pub end_sec: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub download_url: String,
}

/// Aggregates a job, its artifacts and download URLs. Never writes.
#[derive(Clone)]
pub struct StatusReader {
    store: Arc<dyn JobStore>,
    broker: UploadBroker,
}

impl StatusReader {
    pub fn new(store: Arc<dyn JobStore>, broker: UploadBroker) -> Self {
        Self { store, broker }
    }

    pub async fn get_status(&self, token: &JobToken) -> ApiResult<JobStatusView> {
        let job = self
            .store
            .get_job_by_token(token)
            .await?
            .ok_or_else(|| ApiError::not_found("job not found"))?;

        let artifacts = self.store.list_artifacts(&job.id).await?;
        let mut views = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            views.push(self.artifact_view(artifact).await?);
        }

        Ok(JobStatusView {
            token: job.token,
            status: job.status,
            input_key: job.input_key,
            error: job.error,
            artifacts: views,
        })
    }

    async fn artifact_view(&self, artifact: Artifact) -> ApiResult<ArtifactView> {
        let download_url = self.broker.presign_download(&artifact.key).await?;
        Ok(ArtifactView {
            id: artifact.id,
            artifact_type: artifact.artifact_type,
            key: artifact.key,
            title: artifact.title,
            start_sec: artifact.start_sec,
            end_sec: artifact.end_sec,
            created_at: artifact.created_at,
            download_url,
        })
    }
}
