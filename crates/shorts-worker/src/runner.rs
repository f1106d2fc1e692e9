//! Per-task job execution.
//!
//! One call to [`JobRunner::run`] is one attempt: the job moves into
//! `processing`, the stage runs, and the job ends in exactly one of `done` or
//! `failed`. Retrying is the queue's decision, never the runner's.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;

use shorts_models::{JobId, JobStatus};
use shorts_queue::ProcessJobTask;
use shorts_store::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{ArtifactWriter, PipelineStage, StageContext};

/// Why a task was discarded without running the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The job no longer exists.
    NotFound,
    /// The job is in a state a task must not run from (`created` or `done`).
    NotRunnable(JobStatus),
}

/// Result of an attempt that should be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { artifacts: usize },
    Dropped(DropReason),
}

/// Drives one job through the pipeline stage.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    stage: Arc<dyn PipelineStage>,
    job_timeout: Duration,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, stage: Arc<dyn PipelineStage>, job_timeout: Duration) -> Self {
        Self {
            store,
            stage,
            job_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run attempt number `attempt` for `task`.
    ///
    /// `Ok` means the task is finished with and should be acknowledged. `Err`
    /// means the attempt failed; the job is already `failed` when the error
    /// came from the stage.
    pub async fn run(&self, task: &ProcessJobTask, attempt: u32) -> WorkerResult<RunOutcome> {
        let logger = JobLogger::new(task.job_id, attempt);
        let span = logger.span();
        self.attempt(task.job_id, logger).instrument(span).await
    }

    async fn attempt(&self, job_id: JobId, logger: JobLogger) -> WorkerResult<RunOutcome> {
        let moved = self
            .store
            .compare_and_set_status(&job_id, &JobStatus::RUNNABLE, JobStatus::Processing, None)
            .await?;

        if moved == 0 {
            let reason = match self.store.get_job(&job_id).await? {
                None => DropReason::NotFound,
                Some(job) => DropReason::NotRunnable(job.status),
            };
            logger.dropped(reason);
            metrics::record_job_dropped();
            return Ok(RunOutcome::Dropped(reason));
        }

        let Some(job) = self.store.get_job(&job_id).await? else {
            logger.dropped(DropReason::NotFound);
            metrics::record_job_dropped();
            return Ok(RunOutcome::Dropped(DropReason::NotFound));
        };
        let logger = logger.with_token(job.token);

        let Some(input_key) = job.input_key else {
            self.fail(&job_id, &logger, &WorkerError::NoInput).await;
            return Err(WorkerError::NoInput);
        };

        logger.started(self.stage.name(), &input_key);
        let ctx = StageContext {
            job_id,
            input_key,
            artifacts: ArtifactWriter::new(Arc::clone(&self.store), job_id),
            logger: logger.for_stage(self.stage.name()),
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.job_timeout, self.stage.run(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(self.job_timeout)),
        };
        let elapsed = started.elapsed();
        metrics::record_pipeline_duration(elapsed);

        match result {
            Ok(()) => {
                let artifacts = ctx.artifacts.written();
                let rows = self.store.set_status(&job_id, JobStatus::Done, None).await?;
                if rows == 0 {
                    logger.warn("job vanished before it could be marked done");
                }
                logger.done(artifacts, elapsed);
                metrics::record_job_completed();
                Ok(RunOutcome::Completed { artifacts })
            }
            Err(e) => {
                self.fail(&job_id, &logger, &e).await;
                Err(e)
            }
        }
    }

    async fn fail(&self, job_id: &JobId, logger: &JobLogger, error: &WorkerError) {
        let message = error.job_message();
        logger.failed(&message);
        metrics::record_job_failed();

        if let Err(e) = self
            .store
            .set_status(job_id, JobStatus::Failed, Some(&message))
            .await
        {
            logger.warn(&format!("failed to record failure: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shorts_models::NewArtifact;
    use shorts_store::MemoryJobStore;

    use crate::config::SimulatedStageConfig;
    use crate::pipeline::SimulatedStage;

    /// Writes one artifact, then fails or succeeds.
    struct ScriptedStage {
        fail_with: Option<&'static str>,
    }

    #[async_trait]
    impl PipelineStage for ScriptedStage {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, ctx: &StageContext) -> WorkerResult<()> {
            ctx.artifacts
                .write(NewArtifact::new("clip", "outputs/clip-1.mp4").with_clip_bounds(0, 30))
                .await?;
            match self.fail_with {
                Some(msg) => Err(WorkerError::pipeline(msg)),
                None => Ok(()),
            }
        }
    }

    struct SlowStage;

    #[async_trait]
    impl PipelineStage for SlowStage {
        fn name(&self) -> &str {
            "slow"
        }

        async fn run(&self, _ctx: &StageContext) -> WorkerResult<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    async fn queued_job(store: &MemoryJobStore, input: Option<&str>) -> JobId {
        let job = store.create_job().await.unwrap();
        if let Some(key) = input {
            store.attach_input(&job.token, key).await.unwrap();
        }
        store
            .compare_and_set_status(&job.id, &JobStatus::QUEUEABLE, JobStatus::Queued, None)
            .await
            .unwrap();
        job.id
    }

    fn runner(store: Arc<MemoryJobStore>, stage: impl PipelineStage + 'static) -> JobRunner {
        JobRunner::new(store, Arc::new(stage), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_success_marks_done() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = queued_job(&store, Some("uploads/t/a.mp4")).await;
        let runner = runner(store.clone(), ScriptedStage { fail_with: None });

        let outcome = runner.run(&ProcessJobTask::new(job_id), 1).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { artifacts: 1 });

        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_marks_failed_and_keeps_artifacts() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = queued_job(&store, Some("uploads/t/a.mp4")).await;
        let runner = runner(store.clone(), ScriptedStage { fail_with: Some("decoder crashed") });

        let err = runner.run(&ProcessJobTask::new(job_id), 1).await.unwrap_err();
        assert!(matches!(err, WorkerError::Pipeline(_)));

        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("decoder crashed"));
        assert_eq!(store.list_artifacts(&job_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = queued_job(&store, Some("uploads/t/a.mp4")).await;
        let runner = JobRunner::new(store.clone(), Arc::new(SlowStage), Duration::from_millis(20));

        let err = runner.run(&ProcessJobTask::new(job_id), 1).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(_)));

        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_input_fails_job() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = queued_job(&store, None).await;
        let runner = runner(store.clone(), SimulatedStage::new(SimulatedStageConfig::instant()));

        let err = runner.run(&ProcessJobTask::new(job_id), 1).await.unwrap_err();
        assert!(matches!(err, WorkerError::NoInput));

        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("job has no input attached"));
    }

    #[tokio::test]
    async fn test_unknown_job_is_dropped() {
        let store = Arc::new(MemoryJobStore::new());
        let runner = runner(store, ScriptedStage { fail_with: None });

        let outcome = runner.run(&ProcessJobTask::new(JobId::new()), 1).await.unwrap();
        assert_eq!(outcome, RunOutcome::Dropped(DropReason::NotFound));
    }

    #[tokio::test]
    async fn test_done_job_is_not_rerun() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = queued_job(&store, Some("uploads/t/a.mp4")).await;
        store.set_status(&job_id, JobStatus::Done, None).await.unwrap();
        let runner = runner(store.clone(), ScriptedStage { fail_with: None });

        let outcome = runner.run(&ProcessJobTask::new(job_id), 1).await.unwrap();
        assert_eq!(outcome, RunOutcome::Dropped(DropReason::NotRunnable(JobStatus::Done)));
        assert!(store.list_artifacts(&job_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_created_job_is_not_run() {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.create_job().await.unwrap();
        let runner = runner(store.clone(), ScriptedStage { fail_with: None });

        let outcome = runner.run(&ProcessJobTask::new(job.id), 1).await.unwrap();
        assert_eq!(outcome, RunOutcome::Dropped(DropReason::NotRunnable(JobStatus::Created)));
        assert_eq!(
            store.get_job(&job.id).await.unwrap().unwrap().status,
            JobStatus::Created
        );
    }

    #[tokio::test]
    async fn test_retry_after_failure_clears_error() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = queued_job(&store, Some("uploads/t/a.mp4")).await;

        let failing = runner(store.clone(), ScriptedStage { fail_with: Some("flaky") });
        assert!(failing.run(&ProcessJobTask::new(job_id), 1).await.is_err());

        // Redelivery of the same task picks the failed job back up
        let passing = runner(store.clone(), ScriptedStage { fail_with: None });
        passing.run(&ProcessJobTask::new(job_id), 2).await.unwrap();

        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.error.is_none());
    }
}
