pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Casegen API",
        version = "0.1.0",
        description = "Compliance test-case generation: submission, review feedback loop and issue-tracker sync"
    ),
    paths(
        routes::health_check,
        routes::uploads::begin_upload,
        routes::uploads::get_upload,
        routes::uploads::cancel_upload,
        routes::uploads::upload_progress,
        routes::requests::list_requests,
        routes::requests::submit_request,
        routes::requests::get_request,
        routes::requests::open_feedback,
        routes::requests::request_feedback,
        routes::requests::withdraw_feedback,
        routes::requests::accept_request,
        routes::requests::cancel_request,
        routes::requests::list_artifacts,
        routes::requests::export_artifact,
        routes::requests::sync_artifact,
        routes::issue_tracker::tracker_status,
        routes::issue_tracker::authorize,
        routes::issue_tracker::callback,
        routes::issue_tracker::list_projects,
        routes::issue_tracker::logout,
        routes::sse::events_stream,
    ),
    components(schemas(
        routes::HealthResponse,
        routes::uploads::BeginUploadRequest,
        routes::requests::ArtifactSummary,
        routes::requests::SyncRequest,
        routes::requests::SyncResponse,
        routes::issue_tracker::TrackerStatus,
        error::ErrorResponse,
        casegen_core::GenerationRequest,
        casegen_core::RequestStatus,
        casegen_core::SubmitRequest,
        casegen_core::FeedbackRequest,
        casegen_core::FeedbackRound,
        casegen_core::RequestFailure,
        casegen_core::FailureKind,
        casegen_core::ComplianceTag,
        casegen_core::OutputFormat,
        casegen_core::Artifact,
        casegen_core::TestCase,
        casegen_core::SyncRecord,
        casegen_core::SyncState,
        casegen_core::UploadSession,
        casegen_core::UploadState,
        casegen_core::UploadErrorKind,
        casegen_core::DocumentRef,
        tracker::TrackerProject,
        events::EventEnvelope,
        events::Event,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "uploads", description = "Specification document uploads"),
        (name = "requests", description = "Generation request lifecycle"),
        (name = "tracker", description = "Issue-tracker authorization and projects"),
        (name = "events", description = "Real-time event streaming (SSE)"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health_check))
        .route("/api/uploads", post(routes::uploads::begin_upload))
        .route("/api/uploads/{id}", get(routes::uploads::get_upload))
        .route("/api/uploads/{id}/cancel", post(routes::uploads::cancel_upload))
        .route(
            "/api/uploads/{id}/progress",
            get(routes::uploads::upload_progress),
        )
        .route(
            "/api/requests",
            get(routes::requests::list_requests).post(routes::requests::submit_request),
        )
        .route("/api/requests/{id}", get(routes::requests::get_request))
        .route(
            "/api/requests/{id}/feedback",
            post(routes::requests::request_feedback),
        )
        .route(
            "/api/requests/{id}/feedback/open",
            post(routes::requests::open_feedback),
        )
        .route(
            "/api/requests/{id}/feedback/withdraw",
            post(routes::requests::withdraw_feedback),
        )
        .route(
            "/api/requests/{id}/accept",
            post(routes::requests::accept_request),
        )
        .route(
            "/api/requests/{id}/cancel",
            post(routes::requests::cancel_request),
        )
        .route(
            "/api/requests/{id}/artifacts",
            get(routes::requests::list_artifacts),
        )
        .route(
            "/api/requests/{id}/artifacts/{format}",
            get(routes::requests::export_artifact),
        )
        .route(
            "/api/requests/{id}/sync/{format}",
            post(routes::requests::sync_artifact),
        )
        .route(
            "/api/tracker/status",
            get(routes::issue_tracker::tracker_status),
        )
        .route(
            "/api/tracker/authorize",
            get(routes::issue_tracker::authorize),
        )
        .route(
            "/api/tracker/callback",
            get(routes::issue_tracker::callback),
        )
        .route(
            "/api/tracker/projects",
            get(routes::issue_tracker::list_projects),
        )
        .route("/api/tracker/logout", post(routes::issue_tracker::logout))
        .route("/api/events", get(routes::sse::events_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
