//! Worker configuration.

use std::time::Duration;

use uuid::Uuid;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name registered with the queue
    pub worker_id: String,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Pipeline stage timeout per attempt
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker scans for tasks abandoned by other consumers
    pub claim_interval: Duration,
    /// Maximum tasks taken over per scan
    pub claim_batch: usize,
    /// How long one receive call may block waiting for tasks
    pub poll_block: Duration,
    /// Port for a standalone Prometheus listener
    pub metrics_port: Option<u16>,
    pub simulated: SimulatedStageConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            max_concurrent_jobs: 2,
            // Kept below the queue visibility timeout so a live attempt is never claimed away
            job_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            claim_batch: 5,
            poll_block: Duration::from_secs(1),
            metrics_port: None,
            simulated: SimulatedStageConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT").unwrap_or(defaults.job_timeout),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT")
                .unwrap_or(defaults.shutdown_timeout),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS")
                .unwrap_or(defaults.claim_interval),
            claim_batch: defaults.claim_batch,
            poll_block: defaults.poll_block,
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            simulated: SimulatedStageConfig::from_env(),
        }
    }
}

/// Settings for the simulated pipeline stage.
#[derive(Debug, Clone)]
pub struct SimulatedStageConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Inputs whose key contains this marker fail
    pub fail_marker: Option<String>,
}

impl Default for SimulatedStageConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(5000),
            fail_marker: None,
        }
    }
}

impl SimulatedStageConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let min_delay = env_millis("WORKER_SIMULATED_DELAY_MIN_MS").unwrap_or(defaults.min_delay);
        let max_delay = env_millis("WORKER_SIMULATED_DELAY_MAX_MS")
            .unwrap_or(defaults.max_delay)
            .max(min_delay);

        Self {
            min_delay,
            max_delay,
            fail_marker: std::env::var("WORKER_FAIL_INPUT_MARKER")
                .ok()
                .filter(|m| !m.is_empty()),
        }
    }

    /// No delay, no failures. Used by tests and demos.
    pub fn instant() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            fail_marker: None,
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
}
