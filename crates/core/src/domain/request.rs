use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::artifact::{Artifact, OutputFormat};
use super::compliance::ComplianceTag;
use super::upload::DocumentRef;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Draft,
    Validating,
    AwaitingUpload,
    Generating,
    ReadyForReview,
    AwaitingFeedback,
    Regenerating,
    Finalized,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Validating => "validating",
            Self::AwaitingUpload => "awaiting_upload",
            Self::Generating => "generating",
            Self::ReadyForReview => "ready_for_review",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::Regenerating => "regenerating",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "validating" => Some(Self::Validating),
            "awaiting_upload" => Some(Self::AwaitingUpload),
            "generating" => Some(Self::Generating),
            "ready_for_review" => Some(Self::ReadyForReview),
            "awaiting_feedback" => Some(Self::AwaitingFeedback),
            "regenerating" => Some(Self::Regenerating),
            "finalized" => Some(Self::Finalized),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }

    /// States owned by a background drive (engine call or upload wait).
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::Validating | Self::AwaitingUpload | Self::Generating | Self::Regenerating
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    NotSynced,
    Syncing,
    Synced,
    SyncFailed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSynced => "not_synced",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::SyncFailed => "sync_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SyncRecord {
    pub state: SyncState,
    #[serde(default)]
    pub issue_keys: Vec<String>,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct FeedbackRound {
    pub round: u32,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Upload,
    Generation,
    Cancelled,
}

/// Why a request ended up in `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RequestFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RequestFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct GenerationRequest {
    pub id: Uuid,
    pub specification_text: String,
    pub compliance_tags: BTreeSet<ComplianceTag>,
    /// Upload session the request was submitted with, if any.
    pub attachment_file_id: Option<Uuid>,
    /// Set only once that upload has succeeded.
    pub attached_document_ref: Option<DocumentRef>,
    pub requested_formats: Vec<OutputFormat>,
    pub status: RequestStatus,
    pub feedback_rounds_used: u32,
    pub feedback_history: Vec<FeedbackRound>,
    pub artifacts: BTreeMap<OutputFormat, Artifact>,
    pub tracker_sync_state: BTreeMap<OutputFormat, SyncRecord>,
    pub failure: Option<RequestFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationRequest {
    pub fn new(
        specification_text: impl Into<String>,
        compliance_tags: impl IntoIterator<Item = ComplianceTag>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            specification_text: specification_text.into(),
            compliance_tags: compliance_tags.into_iter().collect(),
            attachment_file_id: None,
            attached_document_ref: None,
            requested_formats: OutputFormat::ALL.to_vec(),
            status: RequestStatus::default(),
            feedback_rounds_used: 0,
            feedback_history: Vec::new(),
            artifacts: BTreeMap::new(),
            tracker_sync_state: BTreeMap::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_attachment(mut self, file_id: Uuid) -> Self {
        self.attachment_file_id = Some(file_id);
        self
    }

    pub fn with_formats(mut self, formats: Vec<OutputFormat>) -> Self {
        if !formats.is_empty() {
            let mut formats = formats;
            formats.sort();
            formats.dedup();
            self.requested_formats = formats;
        }
        self
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment_file_id.is_some()
    }

    /// Specification text sent to the engine: the original text followed by
    /// every feedback round submitted so far, oldest first.
    pub fn amended_specification(&self) -> String {
        if self.feedback_history.is_empty() {
            return self.specification_text.clone();
        }

        let mut amended = self.specification_text.trim_end().to_string();
        amended.push_str("\n\nReviewer feedback:");
        for round in &self.feedback_history {
            amended.push_str(&format!("\n- Round {}: {}", round.round, round.text.trim()));
        }
        amended
    }

    /// Swaps in a complete artifact set. Sync bookkeeping restarts with it
    /// because the previous issues describe artifacts that no longer exist.
    pub fn install_artifacts(&mut self, artifacts: BTreeMap<OutputFormat, Artifact>) {
        self.tracker_sync_state = artifacts
            .keys()
            .map(|format| (*format, SyncRecord::default()))
            .collect();
        self.artifacts = artifacts;
        self.updated_at = Utc::now();
    }

    pub fn record_feedback(&mut self, text: impl Into<String>) -> u32 {
        self.feedback_rounds_used += 1;
        self.feedback_history.push(FeedbackRound {
            round: self.feedback_rounds_used,
            text: text.into(),
            submitted_at: Utc::now(),
        });
        self.updated_at = Utc::now();
        self.feedback_rounds_used
    }

    pub fn sync_state(&self, format: OutputFormat) -> SyncState {
        self.tracker_sync_state
            .get(&format)
            .map(|record| record.state)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SubmitRequest {
    pub specification_text: String,
    #[serde(default)]
    pub compliance_tags: Vec<String>,
    /// Upload session id returned by the upload endpoint
    pub file_ref: Option<Uuid>,
    #[serde(default)]
    pub formats: Vec<OutputFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct FeedbackRequest {
    pub feedback: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let request = GenerationRequest::new("Login must lock", [ComplianceTag::Iso27001]);

        assert_eq!(request.status, RequestStatus::Draft);
        assert_eq!(request.feedback_rounds_used, 0);
        assert!(request.artifacts.is_empty());
        assert!(!request.has_attachment());
        assert_eq!(request.requested_formats.len(), 4);
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            RequestStatus::Draft,
            RequestStatus::AwaitingUpload,
            RequestStatus::ReadyForReview,
            RequestStatus::Regenerating,
            RequestStatus::Failed,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::parse("done"), None);
    }

    #[test]
    fn test_terminal_and_transitional_states() {
        assert!(RequestStatus::Finalized.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::ReadyForReview.is_terminal());

        assert!(RequestStatus::Generating.is_transitional());
        assert!(RequestStatus::AwaitingUpload.is_transitional());
        assert!(!RequestStatus::AwaitingFeedback.is_transitional());
    }

    #[test]
    fn test_amended_specification_appends_feedback() {
        let mut request = GenerationRequest::new("Login must lock", [ComplianceTag::Fda]);
        assert_eq!(request.amended_specification(), "Login must lock");

        request.record_feedback("Cover the unlock flow");
        request.record_feedback("Add audit logging checks");

        let amended = request.amended_specification();
        assert!(amended.starts_with("Login must lock\n\nReviewer feedback:"));
        assert!(amended.contains("- Round 1: Cover the unlock flow"));
        assert!(amended.contains("- Round 2: Add audit logging checks"));
        assert_eq!(request.feedback_rounds_used, 2);
    }

    #[test]
    fn test_install_artifacts_replaces_previous_set() {
        let mut request = GenerationRequest::new("spec", [ComplianceTag::Fda]);

        let mut first = BTreeMap::new();
        first.insert(OutputFormat::Pdf, Artifact::new(OutputFormat::Pdf, "a", vec![]));
        first.insert(OutputFormat::Xml, Artifact::new(OutputFormat::Xml, "b", vec![]));
        request.install_artifacts(first);

        let mut second = BTreeMap::new();
        second.insert(OutputFormat::Html, Artifact::new(OutputFormat::Html, "c", vec![]));
        request.install_artifacts(second);

        assert_eq!(request.artifacts.len(), 1);
        assert!(request.artifacts.contains_key(&OutputFormat::Html));
        assert!(!request.tracker_sync_state.contains_key(&OutputFormat::Pdf));
        assert_eq!(request.sync_state(OutputFormat::Html), SyncState::NotSynced);
    }

    #[test]
    fn test_with_formats_dedups_and_ignores_empty() {
        let request = GenerationRequest::new("spec", [ComplianceTag::Fda])
            .with_formats(vec![OutputFormat::Xml, OutputFormat::Pdf, OutputFormat::Xml]);
        assert_eq!(request.requested_formats, vec![OutputFormat::Pdf, OutputFormat::Xml]);

        let request = GenerationRequest::new("spec", [ComplianceTag::Fda]).with_formats(vec![]);
        assert_eq!(request.requested_formats.len(), 4);
    }
}
