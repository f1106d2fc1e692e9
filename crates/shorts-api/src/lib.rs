//! Axum HTTP API server.
//!
//! This crate provides:
//! - The `/v1` job lifecycle routes: create, presign upload, attach input,
//!   queue, status
//! - The queue dispatcher, status reader and stale job watchdog
//! - Rate limiting, security headers, Prometheus metrics

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::{ApiConfig, StaleDetectionConfig};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{QueueDispatcher, StaleJobDetector, StatusReader};
pub use state::AppState;
