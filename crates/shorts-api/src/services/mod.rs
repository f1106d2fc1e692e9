//! Business logic services.

pub mod dispatcher;
pub mod stale_job_detector;
pub mod status_reader;

pub use dispatcher::{DispatchError, DispatchOutcome, QueueDispatcher};
pub use stale_job_detector::{StaleJobDetector, StaleReport};
pub use status_reader::{ArtifactView, JobStatusView, StatusReader};
