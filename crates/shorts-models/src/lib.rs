//! Shared data models for the Shorts job backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their internal ids and public tokens
//! - The job status state machine
//! - Artifacts produced by the pipeline stage

pub mod artifact;
pub mod job;
pub mod job_status;

// Re-export common types
pub use artifact::{Artifact, ArtifactId, NewArtifact};
pub use job::{Job, JobId, JobToken, JobTokenError};
pub use job_status::{JobStatus, ParseJobStatusError};
