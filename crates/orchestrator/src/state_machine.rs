use casegen_core::RequestStatus;

use crate::error::{OrchestratorError, Result};

pub struct RequestStateMachine;

impl RequestStateMachine {
    pub fn validate_transition(from: &RequestStatus, to: &RequestStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &RequestStatus) -> Vec<RequestStatus> {
        match from {
            RequestStatus::Draft => vec![RequestStatus::Validating],
            RequestStatus::Validating => vec![
                RequestStatus::Generating,
                RequestStatus::AwaitingUpload,
                RequestStatus::Failed,
            ],
            RequestStatus::AwaitingUpload => {
                vec![RequestStatus::Generating, RequestStatus::Failed]
            }
            RequestStatus::Generating => {
                vec![RequestStatus::ReadyForReview, RequestStatus::Failed]
            }
            RequestStatus::ReadyForReview => {
                vec![RequestStatus::Finalized, RequestStatus::AwaitingFeedback]
            }
            RequestStatus::AwaitingFeedback => {
                vec![RequestStatus::Regenerating, RequestStatus::ReadyForReview]
            }
            // Cancel lands back on ReadyForReview with the previous artifacts
            RequestStatus::Regenerating => {
                vec![RequestStatus::ReadyForReview, RequestStatus::Failed]
            }
            RequestStatus::Finalized | RequestStatus::Failed => vec![],
        }
    }

    pub fn can_transition(from: &RequestStatus, to: &RequestStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    /// Where an in-flight drive settles when it is cancelled.
    pub fn cancelled_status(current: &RequestStatus) -> Option<RequestStatus> {
        match current {
            RequestStatus::Regenerating => Some(RequestStatus::ReadyForReview),
            RequestStatus::Validating
            | RequestStatus::AwaitingUpload
            | RequestStatus::Generating => Some(RequestStatus::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RequestStatus::Draft,
            RequestStatus::Validating,
            RequestStatus::Generating,
            RequestStatus::ReadyForReview,
            RequestStatus::AwaitingFeedback,
            RequestStatus::Regenerating,
            RequestStatus::ReadyForReview,
            RequestStatus::Finalized,
        ];

        for pair in path.windows(2) {
            assert!(
                RequestStateMachine::can_transition(&pair[0], &pair[1]),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_upload_path() {
        assert!(RequestStateMachine::can_transition(
            &RequestStatus::Validating,
            &RequestStatus::AwaitingUpload
        ));
        assert!(RequestStateMachine::can_transition(
            &RequestStatus::AwaitingUpload,
            &RequestStatus::Generating
        ));
        assert!(RequestStateMachine::can_transition(
            &RequestStatus::AwaitingUpload,
            &RequestStatus::Failed
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!RequestStateMachine::can_transition(
            &RequestStatus::Draft,
            &RequestStatus::Generating
        ));
        assert!(!RequestStateMachine::can_transition(
            &RequestStatus::Generating,
            &RequestStatus::Finalized
        ));
        assert!(!RequestStateMachine::can_transition(
            &RequestStatus::AwaitingFeedback,
            &RequestStatus::Finalized
        ));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for to in [
            RequestStatus::Draft,
            RequestStatus::Validating,
            RequestStatus::Generating,
            RequestStatus::ReadyForReview,
            RequestStatus::Failed,
            RequestStatus::Finalized,
        ] {
            assert!(!RequestStateMachine::can_transition(&RequestStatus::Finalized, &to));
            assert!(!RequestStateMachine::can_transition(&RequestStatus::Failed, &to));
        }
    }

    #[test]
    fn test_invalid_transition_error_names_states() {
        let err = RequestStateMachine::validate_transition(
            &RequestStatus::Finalized,
            &RequestStatus::AwaitingFeedback,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition from finalized to awaiting_feedback"
        );
    }

    #[test]
    fn test_cancelled_status() {
        assert_eq!(
            RequestStateMachine::cancelled_status(&RequestStatus::Regenerating),
            Some(RequestStatus::ReadyForReview)
        );
        assert_eq!(
            RequestStateMachine::cancelled_status(&RequestStatus::Generating),
            Some(RequestStatus::Failed)
        );
        assert_eq!(
            RequestStateMachine::cancelled_status(&RequestStatus::ReadyForReview),
            None
        );
    }
}
