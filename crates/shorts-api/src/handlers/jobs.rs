//! Job lifecycle handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use shorts_models::{JobStatus, JobToken};
use shorts_store::AttachOutcome;

use crate::error::{ApiError, ApiResult};
use crate::extract::ValidatedJson;
use crate::metrics;
use crate::services::JobStatusView;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub token: JobToken,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AttachInputRequest {
    #[validate(length(min = 1, max = 1024, message = "inputKey must be 1 to 1024 characters"))]
    pub input_key: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

/// Tokens that cannot exist are reported like unknown ones.
fn parse_token(raw: &str) -> ApiResult<JobToken> {
    JobToken::parse(raw).map_err(|_| ApiError::not_found("job not found"))
}

/// POST /v1/jobs
pub async fn create_job(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    let job = state.store.create_job().await?;
    info!(job_id = %job.id, token = %job.token, "Job created");
    metrics::record_job_created();

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            token: job.token,
            status: job.status,
        }),
    ))
}

/// GET /v1/jobs/:token
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let token = parse_token(&token)?;
    Ok(Json(state.status_reader.get_status(&token).await?))
}

/// POST /v1/jobs/:token/attach-input
pub async fn attach_input(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ValidatedJson(request): ValidatedJson<AttachInputRequest>,
) -> ApiResult<Json<OkResponse>> {
    let token = parse_token(&token)?;
    let input_key = request.input_key.trim();
    if input_key.is_empty() {
        return Err(ApiError::validation("inputKey must not be empty"));
    }

    match state.store.attach_input(&token, input_key).await? {
        AttachOutcome::Attached => info!(token = %token, input_key, "Input attached"),
        AttachOutcome::Unchanged => info!(token = %token, "Input already attached with the same key"),
    }

    Ok(OkResponse::ok())
}

/// POST /v1/jobs/:token/queue
pub async fn queue_job(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let token = parse_token(&token)?;
    state.dispatcher.queue_job(&token).await?;
    Ok(OkResponse::ok())
}
