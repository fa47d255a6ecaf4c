pub mod artifact;
pub mod compliance;
pub mod request;
pub mod upload;

pub use artifact::{Artifact, OutputFormat, TestCase};
pub use compliance::ComplianceTag;
pub use request::{
    FailureKind, FeedbackRequest, FeedbackRound, GenerationRequest, RequestFailure,
    RequestStatus, SubmitRequest, SyncRecord, SyncState,
};
pub use upload::{DocumentRef, UploadErrorKind, UploadSession, UploadState};
