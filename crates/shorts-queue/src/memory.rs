//! In-process task queue.
//!
//! Mirrors the Redis adapter's contract (dedup while in flight, retry counter,
//! dead-letter after `max_retries`) without a broker. A nacked task is made
//! ready again immediately instead of waiting out the visibility timeout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueConfig, TaskQueue};
use crate::task::{Delivery, NackOutcome, ProcessJobTask, SubmitOutcome};

#[derive(Debug, Clone)]
struct Entry {
    message_id: String,
    dedup_key: String,
    task: ProcessJobTask,
    failures: u32,
}

impl Entry {
    fn to_delivery(&self) -> Delivery {
        Delivery {
            message_id: self.message_id.clone(),
            dedup_key: self.dedup_key.clone(),
            task: self.task.clone(),
            attempt: self.failures + 1,
        }
    }
}

/// A dead-lettered task and the reason of its last failure.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub task: ProcessJobTask,
    pub reason: String,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, (Entry, Instant)>,
    dedup: HashSet<String>,
    dead: Vec<DeadLetter>,
    next_id: u64,
    submitted: u64,
    unavailable: bool,
}

/// In-memory task queue.
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_retries: u32,
    visibility_timeout: Duration,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

impl MemoryTaskQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_retries: config.max_retries.max(1),
            visibility_timeout: config.visibility_timeout,
        }
    }

    /// Make every operation fail with a connection error until reset.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Number of submissions that actually added a task.
    pub async fn submitted_count(&self) -> u64 {
        self.state.lock().await.submitted
    }

    /// Dead-lettered tasks, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead.clone()
    }

    /// Tasks received but not yet acknowledged.
    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    fn check_available(state: &QueueState) -> QueueResult<()> {
        if state.unavailable {
            return Err(QueueError::connection_failed("queue unavailable"));
        }
        Ok(())
    }

    fn take_ready(state: &mut QueueState, max: usize) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while deliveries.len() < max {
            let Some(entry) = state.ready.pop_front() else {
                break;
            };
            deliveries.push(entry.to_delivery());
            state
                .in_flight
                .insert(entry.message_id.clone(), (entry, Instant::now()));
        }
        deliveries
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn submit(&self, dedup_key: &str, task: &ProcessJobTask) -> QueueResult<SubmitOutcome> {
        let mut state = self.state.lock().await;
        Self::check_available(&state)?;

        if !state.dedup.insert(dedup_key.to_string()) {
            debug!(job_id = %task.job_id, "Duplicate task submission ignored");
            return Ok(SubmitOutcome::Duplicate);
        }

        state.next_id += 1;
        state.submitted += 1;
        let message_id = format!("{}-0", state.next_id);
        state.ready.push_back(Entry {
            message_id: message_id.clone(),
            dedup_key: dedup_key.to_string(),
            task: task.clone(),
            failures: 0,
        });
        drop(state);

        self.notify.notify_one();
        Ok(SubmitOutcome::Enqueued { message_id })
    }

    async fn receive(&self, _consumer: &str, max: usize, block: Duration) -> QueueResult<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + block;

        loop {
            {
                let mut state = self.state.lock().await;
                Self::check_available(&state)?;
                let deliveries = Self::take_ready(&mut state, max);
                if !deliveries.is_empty() {
                    return Ok(deliveries);
                }
            }

            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        Self::check_available(&state)?;

        let (entry, _) = state
            .in_flight
            .remove(&delivery.message_id)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.message_id.clone()))?;
        state.dedup.remove(&entry.dedup_key);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, reason: &str) -> QueueResult<NackOutcome> {
        let mut state = self.state.lock().await;
        Self::check_available(&state)?;

        let (mut entry, _) = state
            .in_flight
            .remove(&delivery.message_id)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.message_id.clone()))?;
        entry.failures += 1;

        if entry.failures >= self.max_retries {
            warn!(job_id = %entry.task.job_id, "Moved task to DLQ: {}", reason);
            state.dedup.remove(&entry.dedup_key);
            state.dead.push(DeadLetter {
                task: entry.task,
                reason: reason.to_string(),
            });
            return Ok(NackOutcome::DeadLettered);
        }

        let attempt = entry.failures + 1;
        state.ready.push_back(entry);
        drop(state);

        self.notify.notify_one();
        Ok(NackOutcome::Retrying { attempt })
    }

    async fn claim_stale(&self, _consumer: &str, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut state = self.state.lock().await;
        Self::check_available(&state)?;

        let now = Instant::now();
        let mut claimed = Vec::new();
        for (entry, received_at) in state.in_flight.values_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(*received_at) >= self.visibility_timeout {
                *received_at = now;
                claimed.push(entry.to_delivery());
            }
        }
        Ok(claimed)
    }

    async fn len(&self) -> QueueResult<u64> {
        let state = self.state.lock().await;
        Self::check_available(&state)?;
        Ok((state.ready.len() + state.in_flight.len()) as u64)
    }

    async fn ping(&self) -> QueueResult<()> {
        let state = self.state.lock().await;
        Self::check_available(&state)
    }
}
