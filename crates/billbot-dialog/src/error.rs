//! Error types for billbot-dialog

use thiserror::Error;

/// Result type alias using billbot-dialog Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a dialog
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the billing backend
    #[error(transparent)]
    Backend(#[from] billbot_backend::Error),

    /// The chat transport failed to deliver an action
    #[error("Transport error: {0}")]
    Transport(String),

    /// A session invariant would have been broken
    #[error("Session error: {0}")]
    Session(String),
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}
