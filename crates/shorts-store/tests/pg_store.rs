//! PostgreSQL store tests.
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p shorts-store -- --ignored

use shorts_models::{JobStatus, JobToken, NewArtifact};
use shorts_store::{AttachOutcome, JobStore, PgJobStore, StoreError};
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires Postgres"]
async fn test_create_and_fetch(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = store.create_job().await.unwrap();
    assert_eq!(job.status, JobStatus::Created);

    let by_token = store.get_job_by_token(&job.token).await.unwrap().unwrap();
    assert_eq!(by_token.id, job.id);

    let by_id = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(by_id.token, job.token);

    assert!(store
        .get_job_by_token(&JobToken::generate())
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires Postgres"]
async fn test_attach_input_policy(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = store.create_job().await.unwrap();

    assert_eq!(
        store.attach_input(&job.token, "uploads/x/a.mp4").await.unwrap(),
        AttachOutcome::Attached
    );
    assert_eq!(
        store.attach_input(&job.token, "uploads/x/a.mp4").await.unwrap(),
        AttachOutcome::Unchanged
    );
    assert!(matches!(
        store.attach_input(&job.token, "uploads/x/b.mp4").await,
        Err(StoreError::AlreadyAttached { .. })
    ));
    assert!(matches!(
        store.attach_input(&JobToken::generate(), "k").await,
        Err(StoreError::NotFound(_))
    ));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires Postgres"]
async fn test_compare_and_set_single_winner(pool: PgPool) {
    let store = std::sync::Arc::new(PgJobStore::new(pool));
    let job = store.create_job().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .compare_and_set_status(&job.id, &[JobStatus::Created], JobStatus::Queued, None)
                .await
                .unwrap()
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 1);

    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires Postgres"]
async fn test_failed_then_requeued_clears_error(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = store.create_job().await.unwrap();

    store
        .set_status(&job.id, JobStatus::Failed, Some("boom"))
        .await
        .unwrap();
    let failed = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.error.as_deref(), Some("boom"));

    let affected = store
        .compare_and_set_status(&job.id, &JobStatus::QUEUEABLE, JobStatus::Queued, None)
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let requeued = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, JobStatus::Queued);
    assert!(requeued.error.is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires Postgres"]
async fn test_artifacts_ordered(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = store.create_job().await.unwrap();

    for key in ["first", "second", "third"] {
        store
            .insert_artifact(&job.id, NewArtifact::new("clip", key).with_clip_bounds(0, 10))
            .await
            .unwrap();
    }

    let artifacts = store.list_artifacts(&job.id).await.unwrap();
    assert_eq!(artifacts.len(), 3);
    for pair in artifacts.windows(2) {
        assert!(
            (pair[0].created_at, pair[0].id) <= (pair[1].created_at, pair[1].id),
            "artifacts out of order"
        );
    }
}
