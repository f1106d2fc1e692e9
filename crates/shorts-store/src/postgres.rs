//! PostgreSQL store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shorts_models::{Artifact, ArtifactId, Job, JobId, JobStatus, JobToken, NewArtifact};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::{AttachOutcome, JobStore};

/// Column list for `jobs` queries.
const JOB_COLUMNS: &str = "id, token, status, input_key, error, created_at, updated_at";

/// Column list for `artifacts` queries.
const ARTIFACT_COLUMNS: &str = "id, job_id, type, key, title, start_sec, end_sec, created_at";

/// Token generation attempts before giving up on a unique violation.
const MAX_TOKEN_ATTEMPTS: u32 = 3;

/// Postgres SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    token: String,
    status: String,
    input_key: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::CorruptRow(format!("job {}: {}", row.id, e)))?;
        let token = JobToken::parse(&row.token)
            .map_err(|e| StoreError::CorruptRow(format!("job {}: {}", row.id, e)))?;

        Ok(Job {
            id: JobId(row.id),
            token,
            status,
            input_key: row.input_key,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ArtifactRow {
    id: Uuid,
    job_id: Uuid,
    #[sqlx(rename = "type")]
    artifact_type: String,
    key: String,
    title: Option<String>,
    start_sec: Option<i32>,
    end_sec: Option<i32>,
    created_at: DateTime<Utc>,
}

impl From<ArtifactRow> for Artifact {
    fn from(row: ArtifactRow) -> Self {
        Artifact {
            id: ArtifactId(row.id),
            job_id: JobId(row.job_id),
            artifact_type: row.artifact_type,
            key: row.key,
            title: row.title,
            start_sec: row.start_sec,
            end_sec: row.end_sec,
            created_at: row.created_at,
        }
    }
}

fn status_strings(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Job store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from config.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::config_error("DATABASE_URL not set"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self) -> StoreResult<Job> {
        let query = format!(
            "INSERT INTO jobs (id, token, status) VALUES ($1, $2, $3) RETURNING {JOB_COLUMNS}"
        );

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let candidate = Job::new();
            let result = sqlx::query_as::<_, JobRow>(&query)
                .bind(candidate.id.0)
                .bind(candidate.token.as_str())
                .bind(JobStatus::Created.as_str())
                .fetch_one(&self.pool)
                .await;

            match result {
                Ok(row) => {
                    let job = Job::try_from(row)?;
                    debug!(job_id = %job.id, "Created job");
                    return Ok(job);
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(attempt, "Job token collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::TokenCollision(MAX_TOKEN_ATTEMPTS))
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn get_job_by_token(&self, token: &JobToken) -> StoreResult<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE token = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn attach_input(&self, token: &JobToken, input_key: &str) -> StoreResult<AttachOutcome> {
        let result = sqlx::query(
            "UPDATE jobs SET input_key = $2, updated_at = NOW() \
             WHERE token = $1 AND input_key IS NULL",
        )
        .bind(token.as_str())
        .bind(input_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(AttachOutcome::Attached);
        }

        let job = self
            .get_job_by_token(token)
            .await?
            .ok_or_else(|| StoreError::not_found(token.as_str()))?;

        match job.input_key {
            Some(existing) if existing == input_key => Ok(AttachOutcome::Unchanged),
            Some(existing) => Err(StoreError::AlreadyAttached { existing }),
            // Lost a race with a concurrent clear; not reachable with set-once keys.
            None => Err(StoreError::CorruptRow(format!(
                "job {} has no input after failed attach",
                job.id
            ))),
        }
    }

    async fn compare_and_set_status(
        &self,
        id: &JobId,
        expected: &[JobStatus],
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, error = $3, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($4)",
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(error)
        .bind(status_strings(expected))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn set_status(&self, id: &JobId, status: JobStatus, error: Option<&str>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, error = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_artifact(&self, job_id: &JobId, artifact: NewArtifact) -> StoreResult<Artifact> {
        let query = format!(
            "INSERT INTO artifacts (id, job_id, type, key, title, start_sec, end_sec) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {ARTIFACT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ArtifactRow>(&query)
            .bind(ArtifactId::new().0)
            .bind(job_id.0)
            .bind(&artifact.artifact_type)
            .bind(&artifact.key)
            .bind(&artifact.title)
            .bind(artifact.start_sec)
            .bind(artifact.end_sec)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    StoreError::not_found(job_id.to_string())
                }
                other => other.into(),
            })?;

        Ok(row.into())
    }

    async fn list_artifacts(&self, job_id: &JobId) -> StoreResult<Vec<Artifact>> {
        let query = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE job_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, ArtifactRow>(&query)
            .bind(job_id.0)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Artifact::from).collect())
    }

    async fn list_stale_jobs(
        &self,
        statuses: &[JobStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = ANY($1) AND updated_at < $2 \
             ORDER BY updated_at ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(status_strings(statuses))
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
