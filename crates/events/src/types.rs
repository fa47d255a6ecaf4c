//! Event types for the casegen event system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Request events
    /// A generation request was submitted
    #[serde(rename = "request.created")]
    RequestCreated { request_id: Uuid },

    /// Lifecycle state changed
    #[serde(rename = "request.status_changed")]
    RequestStatusChanged {
        request_id: Uuid,
        from_status: String,
        to_status: String,
    },

    /// A complete artifact set replaced the previous one
    #[serde(rename = "request.artifacts_installed")]
    ArtifactsInstalled {
        request_id: Uuid,
        formats: Vec<String>,
        feedback_round: u32,
    },

    /// Reviewer feedback was accepted for regeneration
    #[serde(rename = "request.feedback_submitted")]
    FeedbackSubmitted {
        request_id: Uuid,
        round: u32,
        remaining: u32,
    },

    // Upload events
    /// Bytes were written for an upload
    #[serde(rename = "upload.progress")]
    UploadProgress {
        file_id: Uuid,
        owner_id: Uuid,
        bytes_transferred: u64,
        percent: u8,
    },

    /// Upload reached a terminal state
    #[serde(rename = "upload.finished")]
    UploadFinished {
        file_id: Uuid,
        owner_id: Uuid,
        success: bool,
        error: Option<String>,
    },

    // Tracker events
    /// OAuth callback completed and a token is held
    #[serde(rename = "tracker.authorized")]
    TrackerAuthorized { cloud_id: String },

    /// Authorization dropped (logout or expiry)
    #[serde(rename = "tracker.logged_out")]
    TrackerLoggedOut,

    /// Sync state of one artifact format changed
    #[serde(rename = "tracker.sync_status_changed")]
    SyncStatusChanged {
        request_id: Uuid,
        format: String,
        state: String,
        issue_keys: Vec<String>,
    },

    // System events
    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Get the request ID associated with this event, if any
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            Event::RequestCreated { request_id } => Some(*request_id),
            Event::RequestStatusChanged { request_id, .. } => Some(*request_id),
            Event::ArtifactsInstalled { request_id, .. } => Some(*request_id),
            Event::FeedbackSubmitted { request_id, .. } => Some(*request_id),
            Event::SyncStatusChanged { request_id, .. } => Some(*request_id),
            Event::UploadProgress { .. }
            | Event::UploadFinished { .. }
            | Event::TrackerAuthorized { .. }
            | Event::TrackerLoggedOut
            | Event::Error { .. } => None,
        }
    }

    /// Wire name used as the `type` tag and as the SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RequestCreated { .. } => "request.created",
            Event::RequestStatusChanged { .. } => "request.status_changed",
            Event::ArtifactsInstalled { .. } => "request.artifacts_installed",
            Event::FeedbackSubmitted { .. } => "request.feedback_submitted",
            Event::UploadProgress { .. } => "upload.progress",
            Event::UploadFinished { .. } => "upload.finished",
            Event::TrackerAuthorized { .. } => "tracker.authorized",
            Event::TrackerLoggedOut => "tracker.logged_out",
            Event::SyncStatusChanged { .. } => "tracker.sync_status_changed",
            Event::Error { .. } => "error",
        }
    }
}
