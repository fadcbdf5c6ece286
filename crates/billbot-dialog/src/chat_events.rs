//! Chat lifecycle and archiving events that sit outside the bill dialog

use std::sync::Arc;

use billbot_backend::{Backend, Identity, RelayedMessage, UserId};

use crate::error::Result;
use crate::event::{ChatRef, IncomingMessage};
use crate::texts;
use crate::transport::ChatTransport;

/// Handles chat registration, unwanted invitations and message relaying
#[derive(Clone)]
pub struct ChatEvents {
    backend: Arc<dyn Backend>,
    transport: Arc<dyn ChatTransport>,
}

impl ChatEvents {
    pub fn new(backend: Arc<dyn Backend>, transport: Arc<dyn ChatTransport>) -> Self {
        Self { backend, transport }
    }

    /// A group was created with the bot in it. The creator must be a
    /// registered administrator, otherwise the bot leaves.
    pub async fn register_chat(&self, chat: ChatRef, creator: UserId) -> Result<()> {
        tracing::info!("Added to new chat {} by user {}", chat.id, creator);
        let valid = self
            .backend
            .register_chat(Identity::new(chat.id, creator))
            .await?;

        if valid {
            self.transport
                .send_message(chat.id, texts::CHAT_CONFIRMED, &[])
                .await?;
        } else {
            tracing::info!("User {} is not an administrator, leaving chat {}", creator, chat.id);
            self.transport
                .send_message(chat.id, texts::NO_ADMIN_RIGHTS, &[])
                .await?;
            self.transport.leave_chat(chat.id).await?;
        }
        Ok(())
    }

    /// The bot was added to a chat that already existed
    pub async fn leave_added_chat(&self, chat: ChatRef) -> Result<()> {
        tracing::info!("Added to existing chat {}, leaving", chat.id);
        self.transport
            .send_message(chat.id, texts::ADDED_TO_CHAT, &[])
            .await?;
        self.transport.leave_chat(chat.id).await
    }

    /// `##command`: store it and echo the backend's reply
    pub async fn relay_command(&self, message: &IncomingMessage) -> Result<()> {
        let command = message.body();
        tracing::info!("Relaying command {:?} from chat {}", command, message.chat.id);
        let reply = self
            .backend
            .relay_command(Identity::new(message.chat.id, message.from), command)
            .await?;
        if !reply.is_empty() {
            self.transport
                .send_message(message.chat.id, &reply, &[])
                .await?;
        }
        Ok(())
    }

    /// Any other group message is archived by the backend
    pub async fn relay_message(&self, message: &IncomingMessage) -> Result<()> {
        tracing::debug!(
            "Relaying message {} from chat {}",
            message.message_id,
            message.chat.id
        );
        let relayed = RelayedMessage {
            message_id: message.message_id,
            text: message.body().to_string(),
            reply_to_message_id: message.reply_to.unwrap_or(0),
        };
        self.backend
            .relay_message(Identity::new(message.chat.id, message.from), &relayed)
            .await?;
        Ok(())
    }
}
