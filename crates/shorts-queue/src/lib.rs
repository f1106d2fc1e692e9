//! Task queue for job processing.
//!
//! This crate provides:
//! - The `TaskQueue` capability: dedup-keyed submit, ack/nack, stale claim
//! - A Redis Streams backend with retry counting and a dead-letter stream
//! - An in-memory backend for tests and single-process runs

pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_queue;
pub mod task;

use std::sync::Arc;

pub use error::{QueueError, QueueResult};
pub use memory::{DeadLetter, MemoryTaskQueue};
pub use queue::{QueueBackend, QueueConfig, TaskQueue};
pub use redis_queue::RedisTaskQueue;
pub use task::{Delivery, NackOutcome, ProcessJobTask, SubmitOutcome};

/// Build and initialize the selected queue backend.
pub async fn connect(backend: QueueBackend, config: QueueConfig) -> QueueResult<Arc<dyn TaskQueue>> {
    let queue: Arc<dyn TaskQueue> = match backend {
        QueueBackend::Memory => {
            tracing::warn!("Using in-memory task queue; tasks are lost on restart");
            Arc::new(MemoryTaskQueue::new(&config))
        }
        QueueBackend::Redis => Arc::new(RedisTaskQueue::new(config)?),
    };
    queue.init().await?;
    Ok(queue)
}
