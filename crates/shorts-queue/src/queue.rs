//! Task queue capability and configuration.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{QueueError, QueueResult};
use crate::task::{Delivery, NackOutcome, ProcessJobTask, SubmitOutcome};

/// Which queue backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    #[default]
    Redis,
    /// In-process queue; only meaningful when producer and consumer share a process
    Memory,
}

impl std::str::FromStr for QueueBackend {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(QueueError::config_error(format!("unknown QUEUE_BACKEND: {other}"))),
        }
    }
}

impl QueueBackend {
    /// Read `QUEUE_BACKEND`, defaulting to Redis.
    pub fn from_env() -> QueueResult<Self> {
        match std::env::var("QUEUE_BACKEND") {
            Ok(value) => value.parse(),
            Err(_) => Ok(QueueBackend::Redis),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for tasks
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Failed attempts before a task is dead-lettered
    pub max_retries: u32,
    /// Idle time after which an unacknowledged task may be claimed by another consumer
    pub visibility_timeout: Duration,
    /// Lifetime of a dedup key when a task is never acknowledged
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "shorts:jobs".to_string(),
            consumer_group: "shorts:workers".to_string(),
            dlq_stream_name: "shorts:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600), // 10 minutes
            dedup_ttl: Duration::from_secs(86400),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            dedup_ttl: std::env::var("QUEUE_DEDUP_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
        }
    }
}

/// At-least-once task queue with per-key deduplication.
///
/// Retry and dead-letter policy belong to the queue: consumers only report
/// each attempt truthfully through `ack` or `nack`.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Prepare backend structures (consumer groups, streams).
    async fn init(&self) -> QueueResult<()>;

    /// Submit a task. While a task with the same `dedup_key` is in flight, a
    /// second submission adds nothing and reports `Duplicate`.
    async fn submit(&self, dedup_key: &str, task: &ProcessJobTask) -> QueueResult<SubmitOutcome>;

    /// Receive up to `max` new tasks, waiting at most `block` when none are ready.
    async fn receive(&self, consumer: &str, max: usize, block: Duration) -> QueueResult<Vec<Delivery>>;

    /// Report a successful attempt. Removes the task and releases its dedup key.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Report a failed attempt.
    async fn nack(&self, delivery: &Delivery, reason: &str) -> QueueResult<NackOutcome>;

    /// Take over tasks another consumer received but left unacknowledged past
    /// the visibility timeout.
    async fn claim_stale(&self, consumer: &str, count: usize) -> QueueResult<Vec<Delivery>>;

    /// Number of tasks held by the queue, delivered or not.
    async fn len(&self) -> QueueResult<u64>;

    /// Connectivity check.
    async fn ping(&self) -> QueueResult<()>;
}
