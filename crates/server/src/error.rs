use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator::OrchestratorError;
use serde::Serialize;
use tracker::TrackerError;
use utoipa::ToSchema;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Orchestrator(OrchestratorError),
    Tracker(TrackerError),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Orchestrator(err) => {
                let status = match err {
                    OrchestratorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    OrchestratorError::UploadRejected(_) => StatusCode::CONFLICT,
                    OrchestratorError::Upload { .. } | OrchestratorError::UploadTimeout { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    OrchestratorError::Generation(_)
                    | OrchestratorError::GenerationTimeout { .. }
                    | OrchestratorError::Sync { .. } => StatusCode::BAD_GATEWAY,
                    OrchestratorError::Unauthorized(_) | OrchestratorError::Authorization(_) => {
                        StatusCode::UNAUTHORIZED
                    }
                    OrchestratorError::RequestNotFound(_) | OrchestratorError::UploadNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    OrchestratorError::FeedbackLimitExceeded { .. }
                    | OrchestratorError::Rejected(_)
                    | OrchestratorError::InvalidTransition { .. }
                    | OrchestratorError::Cancelled => StatusCode::CONFLICT,
                };
                (status, err.kind())
            }
            AppError::Tracker(err) => tracker_status(err),
        }
    }
}

fn tracker_status(err: &TrackerError) -> (StatusCode, &'static str) {
    match err {
        TrackerError::Unauthorized(_) | TrackerError::Authorization(_) | TrackerError::Config(_) => {
            (StatusCode::UNAUTHORIZED, "unauthorized")
        }
        TrackerError::Api { .. } | TrackerError::Network(_) | TrackerError::Decode(_) => {
            (StatusCode::BAD_GATEWAY, "tracker_error")
        }
        TrackerError::PartialBatch { cause, .. } => tracker_status(cause),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_kind();
        let message = match self {
            AppError::BadRequest(msg) => msg,
            AppError::Orchestrator(err) => err.to_string(),
            AppError::Tracker(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %error_type, "{}", message);
        } else {
            tracing::debug!(status = %status, error = %error_type, "{}", message);
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        AppError::Orchestrator(err)
    }
}

impl From<TrackerError> for AppError {
    fn from(err: TrackerError) -> Self {
        AppError::Tracker(err)
    }
}

impl From<casegen_core::CoreError> for AppError {
    fn from(err: casegen_core::CoreError) -> Self {
        AppError::Orchestrator(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegen_core::OutputFormat;
    use uuid::Uuid;

    fn status_of(err: impl Into<AppError>) -> (StatusCode, &'static str) {
        err.into().status_and_kind()
    }

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(
            status_of(OrchestratorError::Validation("empty specification".into())),
            (StatusCode::UNPROCESSABLE_ENTITY, "validation_error")
        );
        assert_eq!(
            status_of(OrchestratorError::FeedbackLimitExceeded { max: 3 }),
            (StatusCode::CONFLICT, "feedback_limit_exceeded")
        );
        assert_eq!(
            status_of(OrchestratorError::Generation("boom".into())),
            (StatusCode::BAD_GATEWAY, "generation_error")
        );
        assert_eq!(
            status_of(OrchestratorError::sync_failed(OutputFormat::Pdf, "boom")),
            (StatusCode::BAD_GATEWAY, "sync_error")
        );
        assert_eq!(
            status_of(OrchestratorError::RequestNotFound(Uuid::new_v4())),
            (StatusCode::NOT_FOUND, "not_found")
        );
        assert_eq!(
            status_of(OrchestratorError::rejected("request not finalized")),
            (StatusCode::CONFLICT, "conflict")
        );
        assert_eq!(
            status_of(OrchestratorError::UploadRejected(
                "upload already in progress".into()
            )),
            (StatusCode::CONFLICT, "upload_error")
        );
    }

    #[test]
    fn test_tracker_errors() {
        assert_eq!(
            status_of(TrackerError::Unauthorized("unknown correlation token".into())),
            (StatusCode::UNAUTHORIZED, "unauthorized")
        );
        assert_eq!(
            status_of(TrackerError::Network("connection refused".into())),
            (StatusCode::BAD_GATEWAY, "tracker_error")
        );
        assert_eq!(
            status_of(TrackerError::PartialBatch {
                created: vec![],
                cause: Box::new(TrackerError::Unauthorized("revoked".into())),
            }),
            (StatusCode::UNAUTHORIZED, "unauthorized")
        );
    }
}
