use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Generation request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("Upload session not found: {0}")]
    UploadNotFound(Uuid),

    #[error("Unknown compliance tag: {0}")]
    UnknownComplianceTag(String),

    #[error("Unknown output format: {0}")]
    UnknownFormat(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let error = CoreError::RequestNotFound(id);
        assert!(error.to_string().contains(&id.to_string()));

        let error = CoreError::UnknownComplianceTag("ISO-14971".to_string());
        assert_eq!(error.to_string(), "Unknown compliance tag: ISO-14971");
    }
}
