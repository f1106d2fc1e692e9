//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second, per client IP
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Serve Prometheus metrics on /metrics
    pub metrics_enabled: bool,
    pub stale_detection: StaleDetectionConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_body_size: 1024 * 1024, // 1MB, bodies are small JSON documents
            environment: "development".to_string(),
            metrics_enabled: true,
            stale_detection: StaleDetectionConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: std::env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: std::env::var("RATE_LIMIT_BURST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_burst),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled: env_flag("METRICS_ENABLED").unwrap_or(defaults.metrics_enabled),
            stale_detection: StaleDetectionConfig::from_env(),
        }
    }

    pub fn is_production(&self) -> bool {
        is_production(&self.environment)
    }
}

/// `ENVIRONMENT` names production, in any case.
pub(crate) fn is_production(environment: &str) -> bool {
    environment.trim().eq_ignore_ascii_case("production")
}

/// Stale job watchdog settings.
#[derive(Debug, Clone)]
pub struct StaleDetectionConfig {
    pub enabled: bool,
    /// A `queued` or `processing` job untouched for this long is stale.
    /// Must exceed the worker job timeout.
    pub threshold: Duration,
    pub interval: Duration,
    /// Jobs examined per status per cycle
    pub batch_size: i64,
}

impl Default for StaleDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: Duration::from_secs(900),
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl StaleDetectionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_flag("ENABLE_STALE_DETECTION").unwrap_or(defaults.enabled),
            threshold: std::env::var("STALE_JOB_THRESHOLD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.threshold),
            interval: std::env::var("STALE_DETECTION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            batch_size: defaults.batch_size,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| v == "true" || v == "1")
}
