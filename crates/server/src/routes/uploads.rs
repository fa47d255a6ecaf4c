use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use base64::Engine as _;
use bytes::Bytes;
use casegen_core::UploadSession;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::routes::sse::SSE_KEEP_ALIVE_INTERVAL;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BeginUploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub content_base64: String,
    /// Draft the document belongs to. Omitted means a fresh owner.
    pub owner_id: Option<Uuid>,
}

#[utoipa::path(
    post,
    path = "/api/uploads",
    request_body = BeginUploadRequest,
    responses(
        (status = 202, description = "Upload started", body = UploadSession),
        (status = 400, description = "Content is not valid base64"),
        (status = 409, description = "Owner already has an upload in progress"),
    ),
    tag = "uploads"
)]
pub async fn begin_upload(
    State(state): State<AppState>,
    Json(payload): Json<BeginUploadRequest>,
) -> Result<(StatusCode, Json<UploadSession>), AppError> {
    let content = base64::engine::general_purpose::STANDARD
        .decode(payload.content_base64.trim())
        .map_err(|e| AppError::BadRequest(format!("contentBase64 is not valid base64: {}", e)))?;

    let session = state
        .uploads
        .begin_upload(
            payload.owner_id.unwrap_or_else(Uuid::new_v4),
            payload.file_name,
            payload.content_type,
            Bytes::from(content),
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(session)))
}

#[utoipa::path(
    get,
    path = "/api/uploads/{id}",
    params(("id" = Uuid, Path, description = "Upload file ID")),
    responses(
        (status = 200, description = "Upload session", body = UploadSession),
        (status = 404, description = "Upload not found"),
    ),
    tag = "uploads"
)]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UploadSession>, AppError> {
    Ok(Json(state.uploads.get(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/uploads/{id}/cancel",
    params(("id" = Uuid, Path, description = "Upload file ID")),
    responses(
        (status = 200, description = "Upload cancelled", body = UploadSession),
        (status = 404, description = "Upload not found"),
        (status = 409, description = "Upload already finished"),
    ),
    tag = "uploads"
)]
pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UploadSession>, AppError> {
    Ok(Json(state.uploads.cancel(id).await?))
}

/// Progress of one upload as SSE. Finite, and available to one consumer only.
#[utoipa::path(
    get,
    path = "/api/uploads/{id}/progress",
    params(("id" = Uuid, Path, description = "Upload file ID")),
    responses(
        (status = 200, description = "SSE progress stream ending with succeeded or failed"),
        (status = 404, description = "Upload not found"),
        (status = 409, description = "Progress stream already taken"),
    ),
    tag = "uploads"
)]
pub async fn upload_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let updates = state.uploads.take_progress(id).await?;

    let stream = updates.enumerate().map(|(seq, update)| {
        let event_type = match update {
            orchestrator::UploadUpdate::Progress { .. } => "progress",
            orchestrator::UploadUpdate::Succeeded { .. } => "succeeded",
            orchestrator::UploadUpdate::Failed { .. } => "failed",
        };
        let data = serde_json::to_string(&update).unwrap_or_else(|_| "{}".to_string());

        Ok(Event::default()
            .id(seq.to_string())
            .event(event_type)
            .data(data))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}
