//! Identity checks for inbound turns.
//!
//! A turn is accepted only when it comes from the user who started the
//! dialog, in the chat it runs in, on the message that carries the current
//! prompt. This stops a second participant from answering on a shared prompt.

use billbot_backend::{ChatId, MessageId, UserId};

use crate::event::{ControlClick, IncomingMessage};
use crate::session::ConversationSession;
use crate::texts;

/// Where a turn came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOrigin {
    pub user: UserId,
    pub chat: ChatId,
    /// Message the turn targets; `None` for typed answers, which arrive as new messages
    pub message: Option<MessageId>,
}

impl From<&ControlClick> for TurnOrigin {
    fn from(click: &ControlClick) -> Self {
        Self {
            user: click.from,
            chat: click.chat.id,
            message: Some(click.message_id),
        }
    }
}

impl From<&IncomingMessage> for TurnOrigin {
    fn from(message: &IncomingMessage) -> Self {
        Self {
            user: message.from,
            chat: message.chat.id,
            message: None,
        }
    }
}

/// Why a turn was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ForeignUser,
    ForeignChat,
    ForeignMessage,
}

impl Rejection {
    /// Notice shown to the submitter only
    pub fn notice(&self) -> &'static str {
        match self {
            Rejection::ForeignUser => texts::FOREIGN_USER,
            Rejection::ForeignChat => texts::FOREIGN_CHAT,
            Rejection::ForeignMessage => texts::FOREIGN_MESSAGE,
        }
    }
}

/// Validate a turn against the session's authorized triple
pub fn validate(origin: &TurnOrigin, session: &ConversationSession) -> Result<(), Rejection> {
    if origin.user != session.authorized_user_id() {
        tracing::debug!(
            "User {} does not match session user {}",
            origin.user,
            session.authorized_user_id()
        );
        return Err(Rejection::ForeignUser);
    }

    if origin.chat != session.authorized_chat_id() {
        tracing::debug!(
            "Chat {} does not match session chat {}",
            origin.chat,
            session.authorized_chat_id()
        );
        return Err(Rejection::ForeignChat);
    }

    if let Some(message) = origin.message {
        if Some(message) != session.anchor_message_id() {
            tracing::debug!(
                "Message {} does not match anchor {:?}",
                message,
                session.anchor_message_id()
            );
            return Err(Rejection::ForeignMessage);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ConversationSession {
        let mut session = ConversationSession::new(-100, 7);
        session.set_anchor(55).unwrap();
        session
    }

    fn click_origin(user: UserId, chat: ChatId, message: MessageId) -> TurnOrigin {
        TurnOrigin {
            user,
            chat,
            message: Some(message),
        }
    }

    #[test]
    fn test_matching_triple_is_accepted() {
        assert_eq!(validate(&click_origin(7, -100, 55), &session()), Ok(()));
    }

    #[test]
    fn test_foreign_user_is_rejected_first() {
        assert_eq!(
            validate(&click_origin(8, -200, 56), &session()),
            Err(Rejection::ForeignUser)
        );
    }

    #[test]
    fn test_foreign_chat() {
        assert_eq!(
            validate(&click_origin(7, -200, 55), &session()),
            Err(Rejection::ForeignChat)
        );
    }

    #[test]
    fn test_foreign_message() {
        assert_eq!(
            validate(&click_origin(7, -100, 56), &session()),
            Err(Rejection::ForeignMessage)
        );
    }

    #[test]
    fn test_typed_turn_skips_message_check() {
        let origin = TurnOrigin {
            user: 7,
            chat: -100,
            message: None,
        };
        assert_eq!(validate(&origin, &session()), Ok(()));
    }

    #[test]
    fn test_click_before_anchor_is_rejected() {
        let fresh = ConversationSession::new(-100, 7);
        assert_eq!(
            validate(&click_origin(7, -100, 55), &fresh),
            Err(Rejection::ForeignMessage)
        );
    }

    #[test]
    fn test_notices_are_distinct() {
        assert_ne!(Rejection::ForeignUser.notice(), Rejection::ForeignChat.notice());
        assert_ne!(Rejection::ForeignChat.notice(), Rejection::ForeignMessage.notice());
    }
}
