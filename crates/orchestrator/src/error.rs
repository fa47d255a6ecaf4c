use casegen_core::{CoreError, OutputFormat, UploadErrorKind};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    Validation(String),

    #[error("Upload failed: {kind}")]
    Upload { kind: UploadErrorKind },

    #[error("{0}")]
    UploadRejected(String),

    #[error("Upload did not finish within {secs}s")]
    UploadTimeout { secs: u64 },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generation did not finish within {secs}s")]
    GenerationTimeout { secs: u64 },

    #[error("feedback limit reached ({max} rounds)")]
    FeedbackLimitExceeded { max: u32 },

    #[error("Tracker authorization required: {0}")]
    Unauthorized(String),

    #[error("Tracker authorization failed: {0}")]
    Authorization(String),

    #[error("Sync of {format} failed: {reason}")]
    Sync { format: OutputFormat, reason: String },

    #[error("{0}")]
    Rejected(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("Upload not found: {0}")]
    UploadNotFound(Uuid),

    #[error("Cancelled")]
    Cancelled,
}

impl OrchestratorError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn sync_failed(format: OutputFormat, reason: impl Into<String>) -> Self {
        Self::Sync {
            format,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable kind, shared by events and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Upload { .. } | Self::UploadRejected(_) | Self::UploadTimeout { .. } => {
                "upload_error"
            }
            Self::Generation(_) | Self::GenerationTimeout { .. } => "generation_error",
            Self::FeedbackLimitExceeded { .. } => "feedback_limit_exceeded",
            Self::Unauthorized(_) | Self::Authorization(_) => "unauthorized",
            Self::Sync { .. } => "sync_error",
            Self::Rejected(_) | Self::InvalidTransition { .. } | Self::Cancelled => "conflict",
            Self::RequestNotFound(_) | Self::UploadNotFound(_) => "not_found",
        }
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::RequestNotFound(id) => Self::RequestNotFound(id),
            CoreError::UploadNotFound(id) => Self::UploadNotFound(id),
            CoreError::UnknownComplianceTag(_) | CoreError::UnknownFormat(_) => {
                Self::Validation(err.to_string())
            }
        }
    }
}

impl From<tracker::TrackerError> for OrchestratorError {
    fn from(err: tracker::TrackerError) -> Self {
        match err {
            tracker::TrackerError::Unauthorized(msg) => Self::Unauthorized(msg),
            tracker::TrackerError::Authorization(msg) | tracker::TrackerError::Config(msg) => {
                Self::Authorization(msg)
            }
            other => Self::Rejected(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            OrchestratorError::Validation("empty specification".into()).kind(),
            "validation_error"
        );
        assert_eq!(
            OrchestratorError::FeedbackLimitExceeded { max: 3 }.kind(),
            "feedback_limit_exceeded"
        );
        assert_eq!(
            OrchestratorError::sync_failed(OutputFormat::Pdf, "boom").kind(),
            "sync_error"
        );
        assert_eq!(OrchestratorError::GenerationTimeout { secs: 1 }.kind(), "generation_error");
    }

    #[test]
    fn test_validation_message_is_the_reason() {
        let err = OrchestratorError::Validation("empty specification".into());
        assert_eq!(err.to_string(), "empty specification");
    }

    #[test]
    fn test_tracker_error_conversion() {
        let err: OrchestratorError =
            tracker::TrackerError::Unauthorized("token expired".into()).into();
        assert!(matches!(err, OrchestratorError::Unauthorized(_)));

        let err: OrchestratorError = CoreError::UnknownComplianceTag("ISO-1".into()).into();
        assert!(matches!(err, OrchestratorError::Validation(msg) if msg.contains("ISO-1")));
    }
}
