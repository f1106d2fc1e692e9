//! Redis Streams queue integration tests.

use std::time::Duration;

use redis::AsyncCommands;

use shorts_models::JobId;
use shorts_queue::{NackOutcome, ProcessJobTask, QueueConfig, RedisTaskQueue, TaskQueue};

/// Config for a throwaway stream so runs do not interfere.
fn test_config(max_retries: u32) -> QueueConfig {
    dotenvy::dotenv().ok();

    let suffix = uuid::Uuid::new_v4();
    QueueConfig {
        stream_name: format!("shorts:test:{}", suffix),
        consumer_group: format!("shorts:test-group:{}", suffix),
        dlq_stream_name: format!("shorts:test-dlq:{}", suffix),
        max_retries,
        ..QueueConfig::from_env()
    }
}

async fn test_queue(max_retries: u32) -> RedisTaskQueue {
    let queue = RedisTaskQueue::new(test_config(max_retries)).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_submit_receive_ack() {
    let queue = test_queue(3).await;
    let task = ProcessJobTask::new(JobId::new());

    let outcome = queue.submit(&task.dedup_key(), &task).await.expect("Failed to submit");
    assert!(!outcome.is_duplicate());

    let deliveries = queue
        .receive("test-consumer", 1, Duration::from_secs(1))
        .await
        .expect("Failed to receive");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].task.job_id, task.job_id);
    assert_eq!(deliveries[0].attempt, 1);

    queue.ack(&deliveries[0]).await.expect("Failed to ack");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_submission_is_noop() {
    let queue = test_queue(3).await;
    let task = ProcessJobTask::new(JobId::new());

    assert!(!queue.submit(&task.dedup_key(), &task).await.unwrap().is_duplicate());
    assert!(queue.submit(&task.dedup_key(), &task).await.unwrap().is_duplicate());
    assert_eq!(queue.len().await.unwrap(), 1);

    let deliveries = queue
        .receive("test-consumer", 10, Duration::from_secs(1))
        .await
        .unwrap();
    queue.ack(&deliveries[0]).await.unwrap();

    // Key released after ack
    assert!(!queue.submit(&task.dedup_key(), &task).await.unwrap().is_duplicate());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_nack_dead_letters_after_max_retries() {
    let queue = test_queue(1).await;
    let task = ProcessJobTask::new(JobId::new());
    queue.submit(&task.dedup_key(), &task).await.unwrap();

    let delivery = queue
        .receive("test-consumer", 1, Duration::from_secs(1))
        .await
        .unwrap()
        .remove(0);

    let outcome = queue.nack(&delivery, "pipeline failed").await.unwrap();
    assert_eq!(outcome, NackOutcome::DeadLettered);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_failed_append_releases_dedup_key() {
    let config = test_config(3);
    let queue = RedisTaskQueue::new(config.clone()).expect("Failed to create queue");
    let client = redis::Client::open(config.redis_url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();

    // A plain string under the stream name makes XADD fail with WRONGTYPE
    conn.set::<_, _, ()>(&config.stream_name, "not-a-stream").await.unwrap();

    let task = ProcessJobTask::new(JobId::new());
    let key = task.dedup_key();
    assert!(queue.submit(&key, &task).await.is_err());

    let held: Option<String> = conn.get(format!("shorts:dedup:{}", key)).await.unwrap();
    assert_eq!(held, None);

    conn.del::<_, ()>(&config.stream_name).await.unwrap();
    queue.init().await.unwrap();
    assert!(!queue.submit(&key, &task).await.unwrap().is_duplicate());
    assert_eq!(queue.len().await.unwrap(), 1);
}
