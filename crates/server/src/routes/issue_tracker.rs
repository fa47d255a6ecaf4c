use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::Json;
use events::Event;
use serde::{Deserialize, Serialize};
use tracker::TrackerProject;
use utoipa::{IntoParams, ToSchema};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: String,
    /// Correlation token issued by `/api/tracker/authorize`
    pub state: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackerStatus {
    pub configured: bool,
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/tracker/status",
    responses(
        (status = 200, description = "Tracker authorization status", body = TrackerStatus),
    ),
    tag = "tracker"
)]
pub async fn tracker_status(State(state): State<AppState>) -> Json<TrackerStatus> {
    Json(TrackerStatus {
        configured: state.tracker.config().is_configured(),
        authorized: state.tracker.is_authorized(),
        cloud_id: state.tracker.cloud_id(),
    })
}

#[utoipa::path(
    get,
    path = "/api/tracker/authorize",
    responses(
        (status = 303, description = "Redirect to the tracker's consent page"),
        (status = 401, description = "Tracker OAuth client is not configured"),
    ),
    tag = "tracker"
)]
pub async fn authorize(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let redirect = state.tracker.authorize()?;
    Ok(Redirect::to(&redirect.url))
}

#[utoipa::path(
    get,
    path = "/api/tracker/callback",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Authorization complete", body = TrackerStatus),
        (status = 401, description = "Unknown or expired correlation token, or the exchange failed"),
    ),
    tag = "tracker"
)]
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<TrackerStatus>, AppError> {
    let authorization = state.tracker.callback(&query.code, &query.state).await?;

    state.event_bus.emit(Event::TrackerAuthorized {
        cloud_id: authorization.cloud_id.clone(),
    });

    Ok(Json(TrackerStatus {
        configured: true,
        authorized: true,
        cloud_id: Some(authorization.cloud_id),
    }))
}

#[utoipa::path(
    get,
    path = "/api/tracker/projects",
    responses(
        (status = 200, description = "Projects visible to the authorized account", body = Vec<TrackerProject>),
        (status = 401, description = "Tracker not authorized"),
    ),
    tag = "tracker"
)]
pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<TrackerProject>>, AppError> {
    Ok(Json(state.tracker.list_projects().await?))
}

#[utoipa::path(
    post,
    path = "/api/tracker/logout",
    responses(
        (status = 200, description = "Authorization dropped", body = TrackerStatus),
    ),
    tag = "tracker"
)]
pub async fn logout(State(state): State<AppState>) -> Json<TrackerStatus> {
    if state.tracker.logout() {
        state.event_bus.emit(Event::TrackerLoggedOut);
    }

    Json(TrackerStatus {
        configured: state.tracker.config().is_configured(),
        authorized: false,
        cloud_id: None,
    })
}
