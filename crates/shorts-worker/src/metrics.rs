//! Worker metrics.
//!
//! Recorded through the `metrics` facade: whichever recorder the process
//! installed (the API's exporter in single-process mode, or the worker's own
//! listener) picks them up.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub fn record_job_completed() {
    counter!("shorts_worker_jobs_total", "outcome" => "completed").increment(1);
}

pub fn record_job_failed() {
    counter!("shorts_worker_jobs_total", "outcome" => "failed").increment(1);
}

pub fn record_job_dropped() {
    counter!("shorts_worker_jobs_total", "outcome" => "dropped").increment(1);
}

pub fn record_dead_lettered() {
    counter!("shorts_worker_dead_lettered_total").increment(1);
}

pub fn record_pipeline_duration(duration: Duration) {
    histogram!("shorts_pipeline_duration_seconds").record(duration.as_secs_f64());
}

/// Serve Prometheus metrics from a standalone worker on `0.0.0.0:{port}`.
pub fn install_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {}", e))?;
    Ok(())
}
