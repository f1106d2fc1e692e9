//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use shorts_queue::{Delivery, NackOutcome, TaskQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::runner::{JobRunner, RunOutcome};

/// Pulls tasks from the queue and runs them with bounded concurrency.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn TaskQueue>,
    runner: Arc<JobRunner>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn TaskQueue>, runner: Arc<JobRunner>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            queue,
            runner,
            job_semaphore,
            shutdown,
        }
    }

    /// Run until [`shutdown`](Self::shutdown) is called, then wait for
    /// in-flight tasks up to the shutdown timeout.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.config.worker_id, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                result = self.consume_tasks() => {
                    if let Err(e) = result {
                        error!("Error consuming tasks: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
        info!("Shutdown signal received, stopping executor");

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout reached with {} jobs still running",
                self.in_flight()
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Tasks currently being executed.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_jobs.max(1) - self.job_semaphore.available_permits()
    }

    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let runner = Arc::clone(&self.runner);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer = self.config.worker_id.clone();
        let batch = self.config.claim_batch;
        let period = self.config.claim_interval.max(Duration::from_secs(1));
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.claim_stale(&consumer, batch).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Claimed {} stale tasks", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    Self::spawn_delivery(permit, Arc::clone(&runner), Arc::clone(&queue), delivery);
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim stale tasks: {}", e),
                        }
                    }
                }
            }
        })
    }

    async fn consume_tasks(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .receive(&self.config.worker_id, available.min(5), self.config.poll_block)
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Received {} tasks from queue", deliveries.len());

        for delivery in deliveries {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("job semaphore closed"))?;
            Self::spawn_delivery(permit, Arc::clone(&self.runner), Arc::clone(&self.queue), delivery);
        }

        Ok(())
    }

    fn spawn_delivery(
        permit: OwnedSemaphorePermit,
        runner: Arc<JobRunner>,
        queue: Arc<dyn TaskQueue>,
        delivery: Delivery,
    ) {
        tokio::spawn(async move {
            let _permit = permit;
            Self::execute(&runner, queue.as_ref(), &delivery).await;
        });
    }

    /// Run one delivery and report the attempt to the queue.
    pub async fn execute(runner: &JobRunner, queue: &dyn TaskQueue, delivery: &Delivery) {
        let job_id = delivery.task.job_id;
        info!(job_id = %job_id, attempt = delivery.attempt, "Executing task");

        match runner.run(&delivery.task, delivery.attempt).await {
            Ok(outcome) => {
                if let RunOutcome::Dropped(reason) = outcome {
                    info!(job_id = %job_id, ?reason, "Task dropped");
                }
                if let Err(e) = queue.ack(delivery).await {
                    error!(job_id = %job_id, "Failed to ack task: {}", e);
                }
            }
            Err(e) => match queue.nack(delivery, &e.to_string()).await {
                Ok(NackOutcome::Retrying { attempt }) => {
                    info!(job_id = %job_id, attempt, "Task will be retried");
                }
                Ok(NackOutcome::DeadLettered) => {
                    warn!(job_id = %job_id, "Task exhausted its retries and was dead-lettered");
                    metrics::record_dead_lettered();
                }
                Err(nack_err) => {
                    error!(job_id = %job_id, "Failed to nack task: {}", nack_err);
                }
            },
        }
    }

    async fn wait_for_jobs(&self) {
        while self.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shorts_models::{JobId, JobStatus};
    use shorts_queue::{MemoryTaskQueue, ProcessJobTask, QueueConfig};
    use shorts_store::{JobStore, MemoryJobStore};

    use crate::config::SimulatedStageConfig;
    use crate::pipeline::SimulatedStage;

    fn config() -> WorkerConfig {
        WorkerConfig {
            poll_block: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    async fn queued_job(store: &MemoryJobStore, input_key: &str) -> JobId {
        let job = store.create_job().await.unwrap();
        store.attach_input(&job.token, input_key).await.unwrap();
        store
            .compare_and_set_status(&job.id, &JobStatus::QUEUEABLE, JobStatus::Queued, None)
            .await
            .unwrap();
        job.id
    }

    async fn wait_for_status(store: &MemoryJobStore, job_id: &JobId, status: JobStatus) {
        for _ in 0..200 {
            if store.get_job(job_id).await.unwrap().unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached {}", status);
    }

    #[tokio::test]
    async fn test_executor_processes_and_acks() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryTaskQueue::default());
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            Arc::new(SimulatedStage::new(SimulatedStageConfig::instant())),
            Duration::from_secs(1),
        ));
        let executor = Arc::new(JobExecutor::new(config(), queue.clone(), runner));

        let handle = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.run().await })
        };

        let job_id = queued_job(&store, "uploads/t/a.mp4").await;
        let task = ProcessJobTask::new(job_id);
        queue.submit(&task.dedup_key(), &task).await.unwrap();

        wait_for_status(&store, &job_id, JobStatus::Done).await;

        executor.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_attempts_dead_letter() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = MemoryTaskQueue::new(&QueueConfig {
            max_retries: 2,
            ..Default::default()
        });
        let runner = JobRunner::new(
            store.clone(),
            Arc::new(SimulatedStage::new(SimulatedStageConfig {
                fail_marker: Some("broken".to_string()),
                ..SimulatedStageConfig::instant()
            })),
            Duration::from_secs(1),
        );

        let job_id = queued_job(&store, "uploads/t/broken.mp4").await;
        let task = ProcessJobTask::new(job_id);
        queue.submit(&task.dedup_key(), &task).await.unwrap();

        for _ in 0..2 {
            let delivery = queue
                .receive("w1", 1, Duration::from_millis(10))
                .await
                .unwrap()
                .remove(0);
            JobExecutor::execute(&runner, &queue, &delivery).await;
        }

        assert_eq!(queue.dead_letters().await.len(), 1);
        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("simulated failure"));
    }

    #[tokio::test]
    async fn test_dropped_task_is_acked() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = MemoryTaskQueue::default();
        let runner = JobRunner::new(
            store,
            Arc::new(SimulatedStage::new(SimulatedStageConfig::instant())),
            Duration::from_secs(1),
        );

        let task = ProcessJobTask::new(JobId::new());
        queue.submit(&task.dedup_key(), &task).await.unwrap();
        let delivery = queue
            .receive("w1", 1, Duration::from_millis(10))
            .await
            .unwrap()
            .remove(0);

        JobExecutor::execute(&runner, &queue, &delivery).await;
        assert_eq!(queue.len().await.unwrap(), 0);
        assert!(queue.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns() {
        let store = Arc::new(MemoryJobStore::new());
        let runner = Arc::new(JobRunner::new(
            store,
            Arc::new(SimulatedStage::new(SimulatedStageConfig::instant())),
            Duration::from_secs(1),
        ));
        let executor = JobExecutor::new(config(), Arc::new(MemoryTaskQueue::default()), runner);

        executor.shutdown();
        tokio::time::timeout(Duration::from_secs(2), executor.run())
            .await
            .unwrap()
            .unwrap();
    }
}
