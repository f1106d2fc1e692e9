//! Background service for detecting and recovering stale jobs.
//!
//! This service runs periodically to:
//! - Re-submit `queued` jobs whose task may have been lost (a no-op while a
//!   task is still in flight)
//! - Fail `processing` jobs whose worker stopped touching them

use std::sync::Arc;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info, warn};

use shorts_models::JobStatus;
use shorts_queue::SubmitOutcome;
use shorts_store::JobStore;

use crate::config::StaleDetectionConfig;
use crate::metrics;
use crate::services::QueueDispatcher;

/// Error recorded on a job failed by the watchdog.
pub const STALE_PROCESSING_ERROR: &str =
    "Processing timed out. The worker may have crashed. Please try again.";

/// Counts from one detection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleReport {
    /// Stale `queued` jobs that got a new task
    pub resubmitted: u32,
    /// Stale `processing` jobs moved to `failed`
    pub failed: u32,
}

/// Stale job detector service.
pub struct StaleJobDetector {
    store: Arc<dyn JobStore>,
    dispatcher: QueueDispatcher,
    config: StaleDetectionConfig,
}

impl StaleJobDetector {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: QueueDispatcher, config: StaleDetectionConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Start the background detection loop.
    ///
    /// Runs until the task is aborted.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Stale job detection is disabled");
            return;
        }

        info!(
            "Starting stale job detector (interval: {:?}, threshold: {:?})",
            self.config.interval, self.config.threshold
        );

        let mut ticker = interval(self.config.interval);

        loop {
            ticker.tick().await;

            match self.check_once().await {
                Ok(report) if report != StaleReport::default() => {
                    info!(
                        "Stale job detection complete: {} resubmitted, {} failed",
                        report.resubmitted, report.failed
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Stale job detection error: {}", e),
            }
        }
    }

    /// Run a single detection cycle.
    pub async fn check_once(&self) -> anyhow::Result<StaleReport> {
        let threshold = chrono::Duration::from_std(self.config.threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let cutoff = Utc::now() - threshold;
        let mut report = StaleReport::default();

        let queued = self
            .store
            .list_stale_jobs(&[JobStatus::Queued], cutoff, self.config.batch_size)
            .await?;
        for job in queued {
            match self.dispatcher.resubmit(&job.id).await {
                Ok(SubmitOutcome::Enqueued { .. }) => {
                    warn!(job_id = %job.id, idle_secs = job.idle_secs(Utc::now()), "Re-submitted stale queued job");
                    metrics::record_stale_job("resubmitted");
                    report.resubmitted += 1;
                }
                Ok(SubmitOutcome::Duplicate) => {}
                Err(e) => error!(job_id = %job.id, "Failed to re-submit stale job: {}", e),
            }
        }

        let processing = self
            .store
            .list_stale_jobs(&[JobStatus::Processing], cutoff, self.config.batch_size)
            .await?;
        for job in processing {
            // CAS so a job that just finished is left alone
            let moved = self
                .store
                .compare_and_set_status(
                    &job.id,
                    &[JobStatus::Processing],
                    JobStatus::Failed,
                    Some(STALE_PROCESSING_ERROR),
                )
                .await?;
            if moved > 0 {
                warn!(job_id = %job.id, idle_secs = job.idle_secs(Utc::now()), "Failed stale processing job");
                metrics::record_stale_job("failed");
                report.failed += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shorts_models::Job;
    use shorts_queue::{MemoryTaskQueue, TaskQueue};
    use shorts_store::MemoryJobStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        queue: Arc<MemoryTaskQueue>,
        detector: StaleJobDetector,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryTaskQueue::default());
        let dispatcher = QueueDispatcher::new(store.clone(), queue.clone());
        let detector = StaleJobDetector::new(
            store.clone(),
            dispatcher,
            StaleDetectionConfig {
                threshold: Duration::from_secs(60),
                ..Default::default()
            },
        );
        Fixture {
            store,
            queue,
            detector,
        }
    }

    async fn seed(store: &MemoryJobStore, status: JobStatus, idle_secs: i64) -> Job {
        let mut job = Job::new();
        job.status = status;
        job.updated_at = Utc::now() - chrono::Duration::seconds(idle_secs);
        store.insert_job(job.clone()).await;
        job
    }

    #[tokio::test]
    async fn test_fails_stale_processing_jobs() {
        let f = fixture();
        let stale = seed(&f.store, JobStatus::Processing, 600).await;
        let fresh = seed(&f.store, JobStatus::Processing, 5).await;

        let report = f.detector.check_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let stale = f.store.get_job(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, JobStatus::Failed);
        assert_eq!(stale.error.as_deref(), Some(STALE_PROCESSING_ERROR));

        let fresh = f.store.get_job(&fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_resubmits_stale_queued_jobs_once() {
        let f = fixture();
        seed(&f.store, JobStatus::Queued, 600).await;
        seed(&f.store, JobStatus::Done, 600).await;

        let first = f.detector.check_once().await.unwrap();
        assert_eq!(first.resubmitted, 1);
        assert_eq!(f.queue.len().await.unwrap(), 1);

        // The task is still in flight, so the second pass adds nothing
        let second = f.detector.check_once().await.unwrap();
        assert_eq!(second.resubmitted, 0);
        assert_eq!(f.queue.submitted_count().await, 1);
    }
}
