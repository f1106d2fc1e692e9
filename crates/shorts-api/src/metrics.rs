//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "shorts_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "shorts_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "shorts_http_requests_in_flight";

    // Job lifecycle metrics
    pub const JOBS_CREATED_TOTAL: &str = "shorts_jobs_created_total";
    pub const JOBS_ENQUEUED_TOTAL: &str = "shorts_jobs_enqueued_total";
    pub const JOBS_QUEUE_CONFLICTS_TOTAL: &str = "shorts_jobs_queue_conflicts_total";
    pub const JOBS_ENQUEUE_FAILURES_TOTAL: &str = "shorts_jobs_enqueue_failures_total";
    pub const STALE_JOBS_TOTAL: &str = "shorts_stale_jobs_total";
    pub const UPLOADS_PRESIGNED_TOTAL: &str = "shorts_uploads_presigned_total";

    // Queue metrics
    pub const QUEUE_LENGTH: &str = "shorts_queue_length";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "shorts_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_created() {
    counter!(names::JOBS_CREATED_TOTAL).increment(1);
}

/// Record a queue submission; `result` is `enqueued` or `duplicate`.
pub fn record_job_enqueued(result: &'static str) {
    counter!(names::JOBS_ENQUEUED_TOTAL, "result" => result).increment(1);
}

pub fn record_queue_conflict() {
    counter!(names::JOBS_QUEUE_CONFLICTS_TOTAL).increment(1);
}

pub fn record_enqueue_failure() {
    counter!(names::JOBS_ENQUEUE_FAILURES_TOTAL).increment(1);
}

/// Record a watchdog action; `action` is `resubmitted` or `failed`.
pub fn record_stale_job(action: &'static str) {
    counter!(names::STALE_JOBS_TOTAL, "action" => action).increment(1);
}

pub fn record_upload_presigned() {
    counter!(names::UPLOADS_PRESIGNED_TOTAL).increment(1);
}

/// Update queue length gauge.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels: job tokens and ids become placeholders.
pub(crate) fn sanitize_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let label = if previous == "jobs" && !segment.is_empty() {
                ":token"
            } else if is_id(segment) {
                ":id"
            } else {
                segment
            };
            previous = segment;
            label
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_id(segment: &str) -> bool {
    (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
        || uuid::Uuid::parse_str(segment).is_ok()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/v1/jobs/Zx8_q-abcdefghijklmnop/queue"),
            "/v1/jobs/:token/queue"
        );
        assert_eq!(sanitize_path("/v1/jobs/Zx8_q-abcdefghijklmnop"), "/v1/jobs/:token");
        assert_eq!(sanitize_path("/v1/jobs"), "/v1/jobs");
        assert_eq!(sanitize_path("/v1/uploads/presign"), "/v1/uploads/presign");
        assert_eq!(
            sanitize_path("/v1/other/550e8400-e29b-41d4-a716-446655440000/42"),
            "/v1/other/:id/:id"
        );
    }
}
