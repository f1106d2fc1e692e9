//! API error types.
//!
//! Every error renders as `{detail, code}`. Store, queue and storage failures
//! are dependency errors (503) unless they describe something the caller did.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::config::is_production;

use shorts_storage::StorageError;
use shorts_store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] shorts_queue::QueueError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) | ApiError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::AlreadyAttached { .. }) => StatusCode::CONFLICT,
            ApiError::Store(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) | ApiError::Store(StoreError::NotFound(_)) => "not_found",
            ApiError::Validation(_) => "validation_error",
            ApiError::Store(StoreError::AlreadyAttached { .. }) => "already_attached",
            ApiError::Conflict(_) => "conflict",
            ApiError::RateLimited => "rate_limited",
            ApiError::Storage(e) if e.is_client_error() => "invalid_upload",
            ApiError::Unavailable(_)
            | ApiError::Queue(_)
            | ApiError::Storage(_)
            | ApiError::Store(_) => match self.status_code() {
                StatusCode::SERVICE_UNAVAILABLE => "dependency_unavailable",
                _ => "internal_error",
            },
        }
    }

    /// Message for the response body; production hides dependency details.
    fn detail(&self, production: bool) -> String {
        match self.status_code() {
            status if !production || !status.is_server_error() => self.to_string(),
            StatusCode::SERVICE_UNAVAILABLE => "A required service is unavailable".to_string(),
            _ => "An internal error occurred".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let production = std::env::var("ENVIRONMENT")
            .map(|name| is_production(&name))
            .unwrap_or(false);

        let body = ErrorResponse {
            detail: self.detail(production),
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}
