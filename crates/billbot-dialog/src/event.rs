//! Inbound chat events

use billbot_backend::{ChatId, MessageId, UserId};

/// The chat an event happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRef {
    pub id: ChatId,
    /// Group chats carry a title; private chats do not
    pub titled: bool,
}

/// A message typed (or posted) by a user
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub chat: ChatRef,
    pub from: UserId,
    pub message_id: MessageId,
    /// Message text, absent for media messages
    pub text: Option<String>,
    /// Media caption
    pub caption: Option<String>,
    pub reply_to: Option<MessageId>,
}

impl IncomingMessage {
    /// Text or caption, whichever is present
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
    }
}

/// A click on a reply control
#[derive(Debug, Clone, PartialEq)]
pub struct ControlClick {
    /// Transport id used to acknowledge the click
    pub click_id: String,
    pub from: UserId,
    pub chat: ChatRef,
    /// The message the control is attached to
    pub message_id: MessageId,
    /// Token of the clicked control
    pub data: String,
}

/// Everything the bot reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(IncomingMessage),
    Click(ControlClick),
    /// A group was created with the bot in it
    ChatCreated { chat: ChatRef, from: UserId },
    /// Members were added to an existing chat
    MembersAdded {
        chat: ChatRef,
        from: UserId,
        members: Vec<UserId>,
    },
}

impl InboundEvent {
    /// The chat the event was delivered in
    pub fn chat(&self) -> ChatRef {
        match self {
            InboundEvent::Message(m) => m.chat,
            InboundEvent::Click(c) => c.chat,
            InboundEvent::ChatCreated { chat, .. } | InboundEvent::MembersAdded { chat, .. } => {
                *chat
            }
        }
    }
}
