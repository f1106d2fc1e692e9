//! Artifacts produced by the pipeline stage.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobId;

/// Unique identifier for an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable output object owned by exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    /// Artifact kind (e.g. "clip", "thumbnail")
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Storage key
    pub key: String,
    pub title: Option<String>,
    /// Clip start, whole seconds
    pub start_sec: Option<i32>,
    /// Clip end, whole seconds
    pub end_sec: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Artifact fields supplied by the pipeline stage; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub artifact_type: String,
    pub key: String,
    pub title: Option<String>,
    pub start_sec: Option<i32>,
    pub end_sec: Option<i32>,
}

impl NewArtifact {
    pub fn new(artifact_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            key: key.into(),
            title: None,
            start_sec: None,
            end_sec: None,
        }
    }

    /// Set title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set clip bounds in seconds.
    pub fn with_clip_bounds(mut self, start_sec: i32, end_sec: i32) -> Self {
        self.start_sec = Some(start_sec);
        self.end_sec = Some(end_sec);
        self
    }

    /// Materialize into a stored artifact.
    pub fn into_artifact(self, job_id: JobId, created_at: DateTime<Utc>) -> Artifact {
        Artifact {
            id: ArtifactId::new(),
            job_id,
            artifact_type: self.artifact_type,
            key: self.key,
            title: self.title,
            start_sec: self.start_sec,
            end_sec: self.end_sec,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_artifact_builder() {
        let artifact = NewArtifact::new("clip", "outputs/job/clip_01.mp4")
            .with_title("Opening")
            .with_clip_bounds(3, 17);

        assert_eq!(artifact.title.as_deref(), Some("Opening"));
        assert_eq!(artifact.start_sec, Some(3));
        assert_eq!(artifact.end_sec, Some(17));
    }

    #[test]
    fn test_artifact_serializes_type_field() {
        let job_id = JobId::new();
        let artifact = NewArtifact::new("clip", "k").into_artifact(job_id, Utc::now());
        let value = serde_json::to_value(&artifact).unwrap();

        assert_eq!(value["type"], "clip");
        assert_eq!(value["jobId"], job_id.to_string());
        assert!(value["startSec"].is_null());
    }
}
