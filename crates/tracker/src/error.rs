use thiserror::Error;

use crate::types::CreatedIssue;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// No usable access token: never authorized, expired, logged out, or the
    /// callback carried an unknown correlation token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The OAuth handshake itself failed.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Tracker API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    /// A batch stopped part way; `created` holds the issues filed before `cause`.
    #[error("{cause} (after creating {} issues)", .created.len())]
    PartialBatch {
        created: Vec<CreatedIssue>,
        #[source]
        cause: Box<TrackerError>,
    },
}

impl TrackerError {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            TrackerError::Unauthorized(_) => true,
            TrackerError::PartialBatch { cause, .. } => cause.is_unauthorized(),
            _ => false,
        }
    }

    /// Split into the issues created before the failure and the failure itself.
    pub fn into_partial(self) -> (Vec<CreatedIssue>, TrackerError) {
        match self {
            TrackerError::PartialBatch { created, cause } => (created, *cause),
            other => (Vec::new(), other),
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TrackerError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TrackerError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TrackerError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(key: &str) -> CreatedIssue {
        CreatedIssue {
            id: "1".to_string(),
            key: key.to_string(),
            self_url: String::new(),
        }
    }

    #[test]
    fn test_partial_batch_keeps_created_issues() {
        let err = TrackerError::PartialBatch {
            created: vec![issue("QA-1")],
            cause: Box::new(TrackerError::Api {
                status: 500,
                message: "boom".to_string(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Tracker API error (500): boom (after creating 1 issues)"
        );
        assert!(!err.is_unauthorized());

        let (created, cause) = err.into_partial();
        assert_eq!(created[0].key, "QA-1");
        assert!(matches!(cause, TrackerError::Api { status: 500, .. }));
    }

    #[test]
    fn test_partial_batch_reports_revoked_token() {
        let err = TrackerError::PartialBatch {
            created: vec![issue("QA-1")],
            cause: Box::new(TrackerError::Unauthorized("revoked".to_string())),
        };
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_plain_error_has_no_partial_result() {
        let (created, cause) = TrackerError::Network("refused".to_string()).into_partial();
        assert!(created.is_empty());
        assert!(matches!(cause, TrackerError::Network(_)));
    }
}
