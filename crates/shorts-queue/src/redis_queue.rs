//! Task queue using Redis Streams.
//!
//! Layout:
//! - `{stream}`: tasks, consumed through a consumer group
//! - `{dlq_stream}`: dead-lettered tasks with their last failure reason
//! - `shorts:dedup:{key}`: claimed together with the `XADD` on submit, cleared on ack or dead-letter
//! - `shorts:retry:{message_id}`: failed-attempt counter

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueConfig, TaskQueue};
use crate::task::{Delivery, NackOutcome, ProcessJobTask, SubmitOutcome};

const RETRY_KEY_TTL_SECS: i64 = 86400;

fn dedup_key(key: &str) -> String {
    format!("shorts:dedup:{}", key)
}

fn retry_key(message_id: &str) -> String {
    format!("shorts:retry:{}", message_id)
}

/// Claim the dedup key and append the task in one step.
///
/// Returns the stream id, or nil when the key is already held. A failed
/// `XADD` releases the key before the error is returned.
fn submit_script() -> Script {
    Script::new(
        r#"
        if not redis.call('SET', KEYS[1], '1', 'NX', 'EX', ARGV[1]) then
            return false
        end
        local id = redis.pcall('XADD', KEYS[2], '*', 'task', ARGV[2], 'key', ARGV[3])
        if type(id) == 'table' and id.err then
            redis.call('DEL', KEYS[1])
        end
        return id
        "#,
    )
}

/// Redis Streams task queue.
pub struct RedisTaskQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisTaskQueue {
    /// Create a new task queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Failed attempts recorded for a message.
    async fn retry_count(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        message_id: &str,
    ) -> QueueResult<u32> {
        let count: Option<u32> = conn.get(retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Turn stream entries into deliveries. Malformed entries are removed so
    /// they are not redelivered forever.
    async fn decode_entries(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        entries: Vec<StreamId>,
    ) -> QueueResult<Vec<Delivery>> {
        let mut deliveries = Vec::with_capacity(entries.len());

        for entry in entries {
            let message_id = entry.id.clone();
            let payload: Option<String> = entry.get("task");
            let key: Option<String> = entry.get("key");

            let task = match payload.as_deref().map(serde_json::from_str::<ProcessJobTask>) {
                Some(Ok(task)) => task,
                Some(Err(e)) => {
                    warn!(message_id = %message_id, "Failed to parse task payload: {}", e);
                    self.remove_message(conn, &message_id).await?;
                    continue;
                }
                None => {
                    warn!(message_id = %message_id, "Stream entry has no task payload");
                    self.remove_message(conn, &message_id).await?;
                    continue;
                }
            };

            let dedup_key = key.unwrap_or_else(|| task.dedup_key());
            let attempt = self.retry_count(conn, &message_id).await? + 1;

            deliveries.push(Delivery {
                message_id,
                dedup_key,
                task,
                attempt,
            });
        }

        Ok(deliveries)
    }

    async fn remove_message(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        message_id: &str,
    ) -> QueueResult<()> {
        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;

        Ok(())
    }

    /// Drop the bookkeeping keys of a finished task.
    async fn release(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        delivery: &Delivery,
    ) -> QueueResult<()> {
        conn.del::<_, ()>(&[dedup_key(&delivery.dedup_key), retry_key(&delivery.message_id)])
            .await?;
        Ok(())
    }

    /// Move a task to the dead letter queue.
    async fn dead_letter(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        delivery: &Delivery,
        reason: &str,
    ) -> QueueResult<()> {
        let payload = serde_json::to_string(&delivery.task)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .arg("error")
            .arg(reason)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(conn)
            .await?;

        self.remove_message(conn, &delivery.message_id).await?;
        self.release(conn, delivery).await?;

        warn!(
            job_id = %delivery.task.job_id,
            attempts = delivery.attempt,
            "Moved task to DLQ: {}",
            reason
        );
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    /// Create the consumer group if it does not exist.
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn submit(&self, key: &str, task: &ProcessJobTask) -> QueueResult<SubmitOutcome> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task)?;
        let dedup = dedup_key(key);

        let added: Option<String> = submit_script()
            .key(&dedup)
            .key(&self.config.stream_name)
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .arg(&payload)
            .arg(key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        match added {
            Some(message_id) => {
                info!(job_id = %task.job_id, message_id = %message_id, "Enqueued task");
                Ok(SubmitOutcome::Enqueued { message_id })
            }
            None => {
                debug!(job_id = %task.job_id, "Duplicate task submission ignored");
                Ok(SubmitOutcome::Duplicate)
            }
        }
    }

    async fn receive(&self, consumer: &str, max: usize, block: Duration) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let deliveries = self.decode_entries(&mut conn, entries).await?;
        debug!(count = deliveries.len(), consumer, "Received tasks");
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.remove_message(&mut conn, &delivery.message_id).await?;
        self.release(&mut conn, delivery).await?;
        debug!(message_id = %delivery.message_id, "Acknowledged task");
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, reason: &str) -> QueueResult<NackOutcome> {
        let mut conn = self.connection().await?;

        let key = retry_key(&delivery.message_id);
        let failures: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_KEY_TTL_SECS).await?;

        if failures >= self.config.max_retries {
            self.dead_letter(&mut conn, delivery, reason).await?;
            return Ok(NackOutcome::DeadLettered);
        }

        // Left pending; redelivered through claim_stale once the visibility timeout passes.
        info!(
            job_id = %delivery.task.job_id,
            failures,
            max_retries = self.config.max_retries,
            "Task attempt failed, will retry"
        );
        Ok(NackOutcome::Retrying {
            attempt: failures + 1,
        })
    }

    async fn claim_stale(&self, consumer: &str, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }

        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;
        let deliveries = self.decode_entries(&mut conn, claimed.ids).await?;

        for delivery in &deliveries {
            info!(
                job_id = %delivery.task.job_id,
                attempt = delivery.attempt,
                "Claimed stale task"
            );
        }

        Ok(deliveries)
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(dedup_key("abc"), "shorts:dedup:abc");
        assert_eq!(retry_key("1-0"), "shorts:retry:1-0");
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = QueueConfig {
            redis_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(RedisTaskQueue::new(config).is_err());
    }
}
