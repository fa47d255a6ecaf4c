use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use casegen_core::{
    FeedbackRequest, GenerationRequest, OutputFormat, SubmitRequest, SyncRecord,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ArtifactSummary {
    pub format: OutputFormat,
    pub file_name: String,
    pub test_case_count: usize,
    pub preview: String,
    pub sync: SyncRecord,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub project_key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    pub request_id: Uuid,
    pub format: OutputFormat,
    pub sync: SyncRecord,
}

fn parse_format(raw: &str) -> Result<OutputFormat, AppError> {
    Ok(raw.parse::<OutputFormat>()?)
}

#[utoipa::path(
    get,
    path = "/api/requests",
    responses(
        (status = 200, description = "All requests, oldest first", body = Vec<GenerationRequest>),
    ),
    tag = "requests"
)]
pub async fn list_requests(State(state): State<AppState>) -> Json<Vec<GenerationRequest>> {
    Json(state.lifecycle.list().await)
}

#[utoipa::path(
    post,
    path = "/api/requests",
    request_body = SubmitRequest,
    responses(
        (status = 202, description = "Request accepted, generation running", body = GenerationRequest),
        (status = 404, description = "Referenced upload not found"),
        (status = 422, description = "Validation failed"),
    ),
    tag = "requests"
)]
pub async fn submit_request(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<GenerationRequest>), AppError> {
    let request = state.lifecycle.submit(payload).await?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}

#[utoipa::path(
    get,
    path = "/api/requests/{id}",
    params(("id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request found", body = GenerationRequest),
        (status = 404, description = "Request not found"),
    ),
    tag = "requests"
)]
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GenerationRequest>, AppError> {
    Ok(Json(state.lifecycle.get(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/requests/{id}/feedback/open",
    params(("id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Feedback prompt open", body = GenerationRequest),
        (status = 409, description = "Not reviewable or feedback limit reached"),
    ),
    tag = "requests"
)]
pub async fn open_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GenerationRequest>, AppError> {
    Ok(Json(state.lifecycle.begin_feedback(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/requests/{id}/feedback",
    params(("id" = Uuid, Path, description = "Request ID")),
    request_body = FeedbackRequest,
    responses(
        (status = 202, description = "Regeneration started", body = GenerationRequest),
        (status = 409, description = "Not reviewable or feedback limit reached"),
        (status = 422, description = "Empty feedback"),
    ),
    tag = "requests"
)]
pub async fn request_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<GenerationRequest>), AppError> {
    let request = state
        .lifecycle
        .request_feedback(id, &payload.feedback)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}

#[utoipa::path(
    post,
    path = "/api/requests/{id}/feedback/withdraw",
    params(("id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Back in review", body = GenerationRequest),
        (status = 409, description = "No feedback prompt open"),
    ),
    tag = "requests"
)]
pub async fn withdraw_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GenerationRequest>, AppError> {
    Ok(Json(state.lifecycle.withdraw_feedback(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/requests/{id}/accept",
    params(("id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request finalized", body = GenerationRequest),
        (status = 409, description = "Request is not in review"),
    ),
    tag = "requests"
)]
pub async fn accept_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GenerationRequest>, AppError> {
    Ok(Json(state.lifecycle.accept(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/requests/{id}/cancel",
    params(("id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request settled after cancellation", body = GenerationRequest),
        (status = 409, description = "Nothing in flight"),
    ),
    tag = "requests"
)]
pub async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GenerationRequest>, AppError> {
    Ok(Json(state.lifecycle.cancel(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/requests/{id}/artifacts",
    params(("id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Artifact previews", body = Vec<ArtifactSummary>),
        (status = 404, description = "Request not found"),
    ),
    tag = "requests"
)]
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ArtifactSummary>>, AppError> {
    let request = state.lifecycle.get(id).await?;

    let summaries = request
        .artifacts
        .values()
        .map(|artifact| ArtifactSummary {
            format: artifact.format,
            file_name: artifact.file_name.clone(),
            test_case_count: artifact.test_cases.len(),
            preview: artifact.preview(),
            sync: request
                .tracker_sync_state
                .get(&artifact.format)
                .cloned()
                .unwrap_or_default(),
        })
        .collect();

    Ok(Json(summaries))
}

#[utoipa::path(
    get,
    path = "/api/requests/{id}/artifacts/{format}",
    params(
        ("id" = Uuid, Path, description = "Request ID"),
        ("format" = String, Path, description = "pdf, word, html or xml"),
    ),
    responses(
        (status = 200, description = "Artifact download"),
        (status = 409, description = "Request not finalized or format missing"),
        (status = 422, description = "Unknown format"),
    ),
    tag = "requests"
)]
pub async fn export_artifact(
    State(state): State<AppState>,
    Path((id, format)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, AppError> {
    let format = parse_format(&format)?;
    let artifact = state.lifecycle.export(id, format).await?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, format.mime_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.content,
    ))
}

#[utoipa::path(
    post,
    path = "/api/requests/{id}/sync/{format}",
    params(
        ("id" = Uuid, Path, description = "Request ID"),
        ("format" = String, Path, description = "pdf, word, html or xml"),
    ),
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Issues created", body = SyncResponse),
        (status = 401, description = "Tracker not authorized"),
        (status = 409, description = "Request not finalized or sync already running"),
        (status = 502, description = "Tracker rejected the issues"),
    ),
    tag = "requests"
)]
pub async fn sync_artifact(
    State(state): State<AppState>,
    Path((id, format)): Path<(Uuid, String)>,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    let format = parse_format(&format)?;
    let sync = state
        .lifecycle
        .sync(id, format, &payload.project_key)
        .await?;

    Ok(Json(SyncResponse {
        request_id: id,
        format,
        sync,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_accepts_aliases() {
        assert_eq!(parse_format("pdf").unwrap(), OutputFormat::Pdf);
        assert!(parse_format("rtf").is_err());
    }
}
