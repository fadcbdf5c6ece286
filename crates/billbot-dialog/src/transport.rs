//! Chat transport abstraction

use async_trait::async_trait;
use billbot_backend::{ChatId, MessageId};

use crate::error::Result;

/// A reply control attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    /// Text shown on the control
    pub label: String,
    /// Opaque token delivered back when the control is clicked
    pub token: String,
}

impl Control {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// How a control click is acknowledged to the user who made it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Stop the client's progress indicator without a notice
    Silent,
    /// Short notice that disappears by itself
    Toast(String),
    /// Notice the user has to dismiss
    Alert(String),
}

/// Messaging primitives the dialog needs from the chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new message with controls, one per row; returns its id
    async fn send_message(&self, chat: ChatId, text: &str, controls: &[Control])
    -> Result<MessageId>;

    /// Replace text and controls of an existing message
    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        controls: &[Control],
    ) -> Result<()>;

    /// Remove all controls from a message, keeping its text
    async fn clear_controls(&self, chat: ChatId, message: MessageId) -> Result<()>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()>;

    /// Acknowledge a control click
    async fn acknowledge(&self, click_id: &str, ack: Acknowledgement) -> Result<()>;

    /// Send a document by URL with a caption
    async fn send_document(&self, chat: ChatId, url: &str, caption: &str) -> Result<()>;

    async fn leave_chat(&self, chat: ChatId) -> Result<()>;
}
