//! Pipeline stage seam.
//!
//! The worker treats media processing as one opaque stage: it receives the
//! job's input key and records artifacts through an [`ArtifactWriter`] as it
//! produces them. Artifacts written before a failure stay on the job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use shorts_models::{Artifact, JobId, NewArtifact};
use shorts_store::JobStore;

use crate::config::SimulatedStageConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Persists artifacts for the job being processed.
pub struct ArtifactWriter {
    store: Arc<dyn JobStore>,
    job_id: JobId,
    written: AtomicUsize,
}

impl ArtifactWriter {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self {
            store,
            job_id,
            written: AtomicUsize::new(0),
        }
    }

    pub async fn write(&self, artifact: NewArtifact) -> WorkerResult<Artifact> {
        let artifact = self.store.insert_artifact(&self.job_id, artifact).await?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(artifact)
    }

    /// Artifacts written so far in this attempt.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }
}

/// Everything a stage gets to see about the job.
pub struct StageContext {
    pub job_id: JobId,
    pub input_key: String,
    pub artifacts: ArtifactWriter,
    pub logger: JobLogger,
}

/// One opaque processing step.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run the stage. An error fails the attempt with the error's message.
    async fn run(&self, ctx: &StageContext) -> WorkerResult<()>;
}

/// Stand-in for real media processing: sleeps for a random delay in the
/// configured range and produces no artifacts.
pub struct SimulatedStage {
    config: SimulatedStageConfig,
}

impl SimulatedStage {
    pub fn new(config: SimulatedStageConfig) -> Self {
        Self { config }
    }

    fn pick_delay(&self) -> Duration {
        let min = self.config.min_delay.as_millis() as u64;
        let max = self.config.max_delay.as_millis() as u64;
        if max <= min {
            return self.config.min_delay;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[async_trait]
impl PipelineStage for SimulatedStage {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn run(&self, ctx: &StageContext) -> WorkerResult<()> {
        let delay = self.pick_delay();
        ctx.logger
            .progress(&format!("simulating work for {}ms", delay.as_millis()));
        tokio::time::sleep(delay).await;

        if let Some(marker) = &self.config.fail_marker {
            if ctx.input_key.contains(marker.as_str()) {
                return Err(WorkerError::pipeline(format!(
                    "simulated failure for input {}",
                    ctx.input_key
                )));
            }
        }

        Ok(())
    }
}
