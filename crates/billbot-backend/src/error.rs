//! Error types for billbot-backend

use thiserror::Error;

/// Result type alias using billbot-backend Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the billing backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status
    #[error("Server returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Server asked to stop the dialog
    #[error("Server terminated the dialog: {reason}")]
    Terminated { reason: String, destroy: bool },

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Question carried an answer type outside the known set
    #[error("Unknown answer type: {0}")]
    UnknownAnswerType(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// How a backend failure is surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport or non-success failure; the user may retry later
    ServerUnavailable,
    /// The server explicitly stopped the dialog and supplied a reason
    ServerTerminated,
    /// The payload did not have the expected shape
    MalformedResponse,
}

impl Error {
    /// Create a terminated error from the server reason
    pub fn terminated(reason: impl Into<String>, destroy: bool) -> Self {
        Self::Terminated {
            reason: reason.into(),
            destroy,
        }
    }

    /// Classify this error into one of the user-facing failure kinds
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Http(_) | Error::Status { .. } => FailureKind::ServerUnavailable,
            Error::Terminated { .. } => FailureKind::ServerTerminated,
            Error::Json(_)
            | Error::UnexpectedResponse(_)
            | Error::UnknownAnswerType(_)
            | Error::InvalidConfig(_) => FailureKind::MalformedResponse,
        }
    }
}
