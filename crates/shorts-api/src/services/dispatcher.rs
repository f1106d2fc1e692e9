//! Queue dispatcher.
//!
//! Moving a job into `queued` is a two-step protocol: a compare-and-set on the
//! job row, then a dedup-keyed submission to the task queue. The status write
//! always lands first, so a worker can never see a task for a job that is not
//! yet `queued`. When submission fails the job is marked `failed` before the
//! caller hears about it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use shorts_models::{JobId, JobStatus, JobToken};
use shorts_queue::{ProcessJobTask, QueueError, QueueResult, SubmitOutcome, TaskQueue};
use shorts_store::{JobStore, StoreError};

use crate::error::ApiError;
use crate::metrics;

/// Result of a successful queue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A new task was handed to the queue.
    Enqueued,
    /// A task for this job was already in flight; nothing new was submitted.
    AlreadyQueued,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job not found")]
    NotFound,

    #[error("job is {0} and cannot be queued")]
    NotQueueable(JobStatus),

    #[error("enqueue failed: {0}")]
    EnqueueFailed(#[source] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound => ApiError::not_found("job not found"),
            DispatchError::NotQueueable(_) => ApiError::conflict(err.to_string()),
            DispatchError::EnqueueFailed(_) => ApiError::unavailable(err.to_string()),
            DispatchError::Store(e) => ApiError::Store(e),
        }
    }
}

/// Transitions jobs into `queued` and submits their task.
#[derive(Clone)]
pub struct QueueDispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
}

impl QueueDispatcher {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Queue the job identified by `token`.
    ///
    /// Allowed from `created`, `queued` and `failed`; any stored error is
    /// cleared. Concurrent calls for one job produce at most one in-flight
    /// task.
    pub async fn queue_job(&self, token: &JobToken) -> Result<DispatchOutcome, DispatchError> {
        let job = self
            .store
            .get_job_by_token(token)
            .await?
            .ok_or(DispatchError::NotFound)?;

        let moved = self
            .store
            .compare_and_set_status(&job.id, &JobStatus::QUEUEABLE, JobStatus::Queued, None)
            .await?;

        if moved == 0 {
            // Lost to a worker or never queueable; report what the job is now
            let current = self
                .store
                .get_job(&job.id)
                .await?
                .ok_or(DispatchError::NotFound)?;
            info!(job_id = %job.id, status = %current.status, "Queue request rejected");
            metrics::record_queue_conflict();
            return Err(DispatchError::NotQueueable(current.status));
        }

        let task = ProcessJobTask::new(job.id);
        match self.queue.submit(&task.dedup_key(), &task).await {
            Ok(SubmitOutcome::Enqueued { message_id }) => {
                info!(job_id = %job.id, message_id = %message_id, "Job enqueued");
                metrics::record_job_enqueued("enqueued");
                Ok(DispatchOutcome::Enqueued)
            }
            Ok(SubmitOutcome::Duplicate) => {
                info!(job_id = %job.id, "Job already has a task in flight");
                metrics::record_job_enqueued("duplicate");
                Ok(DispatchOutcome::AlreadyQueued)
            }
            Err(e) => {
                warn!(job_id = %job.id, "Enqueue failed: {}", e);
                metrics::record_enqueue_failure();
                let message = format!("enqueue failed: {}", e);
                // A worker may already be running an earlier task for this job
                match self
                    .store
                    .compare_and_set_status(
                        &job.id,
                        &[JobStatus::Queued],
                        JobStatus::Failed,
                        Some(&message),
                    )
                    .await
                {
                    Ok(0) => {
                        warn!(job_id = %job.id, "Job left queued before the enqueue failure was recorded")
                    }
                    Ok(_) => {}
                    Err(store_err) => {
                        error!(job_id = %job.id, "Failed to record enqueue failure: {}", store_err)
                    }
                }
                Err(DispatchError::EnqueueFailed(e))
            }
        }
    }

    /// Submit a task for a job already in `queued` without touching its row.
    /// A no-op while a task for the job is in flight.
    pub async fn resubmit(&self, job_id: &JobId) -> QueueResult<SubmitOutcome> {
        let task = ProcessJobTask::new(*job_id);
        self.queue.submit(&task.dedup_key(), &task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shorts_queue::MemoryTaskQueue;
    use shorts_store::MemoryJobStore;

    fn dispatcher() -> (Arc<MemoryJobStore>, Arc<MemoryTaskQueue>, QueueDispatcher) {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryTaskQueue::default());
        let dispatcher = QueueDispatcher::new(store.clone(), queue.clone());
        (store, queue, dispatcher)
    }

    #[tokio::test]
    async fn test_queue_from_queueable_states() {
        for from in JobStatus::QUEUEABLE {
            let (store, _queue, dispatcher) = dispatcher();
            let job = store.create_job().await.unwrap();
            store
                .set_status(&job.id, from, Some("previous error").filter(|_| from == JobStatus::Failed))
                .await
                .unwrap();

            dispatcher.queue_job(&job.token).await.unwrap();

            let job = store.get_job(&job.id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Queued, "from {}", from);
            assert!(job.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_queue_rejected_from_processing_and_done() {
        for from in [JobStatus::Processing, JobStatus::Done] {
            let (store, queue, dispatcher) = dispatcher();
            let job = store.create_job().await.unwrap();
            store.set_status(&job.id, from, None).await.unwrap();

            let err = dispatcher.queue_job(&job.token).await.unwrap_err();
            assert!(matches!(err, DispatchError::NotQueueable(s) if s == from));

            assert_eq!(store.get_job(&job.id).await.unwrap().unwrap().status, from);
            assert_eq!(queue.submitted_count().await, 0);
        }
    }

    #[tokio::test]
    async fn test_unknown_token_not_found() {
        let (_store, _queue, dispatcher) = dispatcher();
        let err = dispatcher.queue_job(&JobToken::generate()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));
    }

    #[tokio::test]
    async fn test_second_request_is_duplicate() {
        let (store, queue, dispatcher) = dispatcher();
        let job = store.create_job().await.unwrap();

        assert_eq!(dispatcher.queue_job(&job.token).await.unwrap(), DispatchOutcome::Enqueued);
        assert_eq!(
            dispatcher.queue_job(&job.token).await.unwrap(),
            DispatchOutcome::AlreadyQueued
        );
        assert_eq!(queue.submitted_count().await, 1);
    }

    #[tokio::test]
    async fn test_submit_failure_marks_job_failed() {
        let (store, queue, dispatcher) = dispatcher();
        let job = store.create_job().await.unwrap();
        queue.set_unavailable(true).await;

        let err = dispatcher.queue_job(&job.token).await.unwrap_err();
        assert!(matches!(err, DispatchError::EnqueueFailed(_)));
        assert_eq!(
            ApiError::from(err).status_code(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("enqueue failed"));
    }

    /// Starts the job as a worker would, then fails the submission.
    struct PickedUpThenFailingQueue {
        store: Arc<MemoryJobStore>,
    }

    #[async_trait::async_trait]
    impl TaskQueue for PickedUpThenFailingQueue {
        async fn init(&self) -> QueueResult<()> {
            Ok(())
        }

        async fn submit(&self, _dedup_key: &str, task: &ProcessJobTask) -> QueueResult<SubmitOutcome> {
            self.store
                .compare_and_set_status(&task.job_id, &JobStatus::RUNNABLE, JobStatus::Processing, None)
                .await
                .unwrap();
            Err(QueueError::connection_failed("connection reset"))
        }

        async fn receive(
            &self,
            _consumer: &str,
            _max: usize,
            _block: std::time::Duration,
        ) -> QueueResult<Vec<shorts_queue::Delivery>> {
            Ok(Vec::new())
        }

        async fn ack(&self, _delivery: &shorts_queue::Delivery) -> QueueResult<()> {
            Ok(())
        }

        async fn nack(
            &self,
            _delivery: &shorts_queue::Delivery,
            _reason: &str,
        ) -> QueueResult<shorts_queue::NackOutcome> {
            Ok(shorts_queue::NackOutcome::DeadLettered)
        }

        async fn claim_stale(&self, _consumer: &str, _count: usize) -> QueueResult<Vec<shorts_queue::Delivery>> {
            Ok(Vec::new())
        }

        async fn len(&self) -> QueueResult<u64> {
            Ok(0)
        }

        async fn ping(&self) -> QueueResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_submit_failure_leaves_running_job_alone() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(PickedUpThenFailingQueue { store: store.clone() });
        let dispatcher = QueueDispatcher::new(store.clone(), queue);
        let job = store.create_job().await.unwrap();

        let err = dispatcher.queue_job(&job.token).await.unwrap_err();
        assert!(matches!(err, DispatchError::EnqueueFailed(_)));

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_resubmit_is_noop_while_in_flight() {
        let (store, queue, dispatcher) = dispatcher();
        let job = store.create_job().await.unwrap();
        dispatcher.queue_job(&job.token).await.unwrap();

        assert!(dispatcher.resubmit(&job.id).await.unwrap().is_duplicate());
        assert_eq!(queue.submitted_count().await, 1);
    }
}
