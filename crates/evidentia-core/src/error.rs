//! Error types for evidentia.

use thiserror::Error;

/// Result type alias using evidentia's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for evidentia operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Evidence item not found
    #[error("Evidence not found: {0}")]
    EvidenceNotFound(uuid::Uuid),

    /// Core activity not found
    #[error("Activity not found: {0}")]
    ActivityNotFound(uuid::Uuid),

    /// Project not found
    #[error("Project not found: {0}")]
    ProjectNotFound(uuid::Uuid),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model output could not be parsed into the expected structure
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    /// External call exceeded its time budget
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl Error {
    /// Whether the failure is transient: the affected items should be left in
    /// a retryable state instead of aborting the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Inference(_) | Error::MalformedResponse(_) | Error::Timeout(_) | Error::Request(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
