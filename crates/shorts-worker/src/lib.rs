//! Job worker.
//!
//! This crate provides:
//! - `JobRunner`: one attempt of one job (CAS into processing, run the stage,
//!   finalize to done or failed)
//! - `JobExecutor`: queue consumption with bounded concurrency, stale-task
//!   claiming and graceful shutdown
//! - The `PipelineStage` seam and a simulated stage

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod runner;

pub use config::{SimulatedStageConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::{ArtifactWriter, PipelineStage, SimulatedStage, StageContext};
pub use runner::{DropReason, JobRunner, RunOutcome};
