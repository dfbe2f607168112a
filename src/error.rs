use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds of an upload run.
///
/// Everything here is fatal to the batch. Duplicate uploads are not errors,
/// they surface as [`crate::uploader::UploadOutcome::Duplicate`].
#[derive(Debug, Error)]
pub enum UploaderError {
    #[error("Configuration error: {0}")]
    ConfigMissing(String),

    #[error("Credentials error: {0}")]
    CredentialMissing(String),

    #[error("Failed to parse {}: {reason}", file.display())]
    Parse { file: PathBuf, reason: String },

    #[error("Daily rate limit exceeded during {0}")]
    RateLimitExceeded(String),

    #[error("Upload of {} failed: {reason}", file.display())]
    UploadFailed { file: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, UploaderError>;
