use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Opaque handle to a document held by the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct DocumentRef(pub String);

impl DocumentRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    Empty,
    TooLarge,
    UnsupportedType,
    Storage,
    Cancelled,
}

impl UploadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooLarge => "too_large",
            Self::UnsupportedType => "unsupported_type",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct UploadSession {
    pub file_id: Uuid,
    /// Draft the file belongs to; at most one live upload per owner.
    pub owner_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub byte_size: u64,
    pub bytes_transferred: u64,
    pub state: UploadState,
    pub result_ref: Option<DocumentRef>,
    pub error: Option<UploadErrorKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        owner_id: Uuid,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        byte_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            file_id: Uuid::new_v4(),
            owner_id,
            file_name: file_name.into(),
            content_type: content_type.into(),
            byte_size,
            bytes_transferred: 0,
            state: UploadState::default(),
            result_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn percent(&self) -> u8 {
        if self.byte_size == 0 {
            return if self.state == UploadState::Succeeded { 100 } else { 0 };
        }
        ((self.bytes_transferred.min(self.byte_size) * 100) / self.byte_size) as u8
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn record_progress(&mut self, bytes_transferred: u64) {
        self.state = UploadState::InProgress;
        self.bytes_transferred = bytes_transferred.min(self.byte_size);
        self.updated_at = Utc::now();
    }

    pub fn succeed(&mut self, result_ref: DocumentRef) {
        self.state = UploadState::Succeeded;
        self.bytes_transferred = self.byte_size;
        self.result_ref = Some(result_ref);
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, kind: UploadErrorKind) {
        self.state = UploadState::Failed;
        self.error = Some(kind);
        self.result_ref = None;
        self.updated_at = Utc::now();
    }
}
