//! Upload handlers.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use shorts_models::JobToken;
use shorts_storage::PresignedUpload;

use crate::error::{ApiError, ApiResult};
use crate::extract::ValidatedJson;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[validate(length(min = 1, max = 255))]
    pub content_type: String,
    #[validate(range(min = 1))]
    pub size_bytes: u64,
    /// Job the upload is for; scopes the key under the job's token
    #[serde(default)]
    pub job_token: Option<String>,
}

/// POST /v1/uploads/presign
///
/// Size and content type are bound into the signed URL; the upload limit is
/// enforced by the broker's policy.
pub async fn presign_upload(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<PresignUploadRequest>,
) -> ApiResult<Json<PresignedUpload>> {
    let job_token = match request.job_token.as_deref() {
        None => None,
        Some(raw) => {
            let token = JobToken::parse(raw).map_err(|_| ApiError::not_found("job not found"))?;
            let job = state
                .store
                .get_job_by_token(&token)
                .await?
                .ok_or_else(|| ApiError::not_found("job not found"))?;
            Some(job.token)
        }
    };

    let upload = state
        .broker
        .presign_upload(
            &request.filename,
            &request.content_type,
            request.size_bytes,
            job_token.as_ref(),
        )
        .await?;

    info!(key = %upload.key, size_bytes = request.size_bytes, "Presigned upload");
    metrics::record_upload_presigned();

    Ok(Json(upload))
}
