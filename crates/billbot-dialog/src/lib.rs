//! billbot-dialog: the bill dialog state machine
//!
//! This crate drives a multi-step bill request inside a group chat: it asks
//! the questions supplied by the backend, validates who answers, and routes
//! the finished form through administrator approval.

pub mod approval;
pub mod chat_events;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod guard;
pub mod render;
pub mod router;
pub mod session;
pub mod texts;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use approval::{ApprovalCoordinator, ApprovalDecision, ApprovalRequest, ApprovalToken};
pub use chat_events::ChatEvents;
pub use dispatch::Dispatcher;
pub use engine::DialogEngine;
pub use error::{Error, Result};
pub use event::{ChatRef, ControlClick, InboundEvent, IncomingMessage};
pub use guard::{Rejection, TurnOrigin};
pub use render::RenderedPrompt;
pub use router::{Route, Router, RouterConfig, conversation_of};
pub use session::{ConversationId, ConversationSession, InMemorySessionStore, SessionStore, Stage};
pub use transport::{Acknowledgement, ChatTransport, Control};
