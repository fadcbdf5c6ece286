//! Routing of inbound events.
//!
//! Rules are checked top to bottom and the first match wins; events no rule
//! claims go to the fallback. Events of one conversation are handled one at
//! a time, so a session is never read and written by two turns at once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use billbot_backend::{AnswerType, Backend, ChatId, UserId};

use crate::{
    approval::ApprovalToken,
    chat_events::ChatEvents,
    engine::DialogEngine,
    error::Result,
    event::{ChatRef, ControlClick, InboundEvent, IncomingMessage},
    render::SKIP_TOKEN,
    session::{SessionStore, Stage},
    texts,
    transport::{Acknowledgement, ChatTransport},
};

const COMMAND_PREFIX: &str = "##";
const BILL_COMMAND: &str = "bill";

/// Static bot settings the rules depend on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// The bot's own user id
    pub bot_id: UserId,
    /// Username accepted in `/bill@<username>`
    pub bot_username: Option<String>,
    /// Private chat of the bot owner; never served
    pub home_chat_id: ChatId,
}

impl RouterConfig {
    /// Groups other than the home chat
    pub fn is_valid_chat(&self, chat: ChatRef) -> bool {
        chat.id != self.home_chat_id && chat.titled
    }

    /// `/bill`, `/bill@<bot>`, optionally followed by arguments
    pub fn is_bill_command(&self, text: &str) -> bool {
        let Some(command) = text
            .split_whitespace()
            .next()
            .and_then(|word| word.strip_prefix('/'))
        else {
            return false;
        };
        match command.split_once('@') {
            None => command == BILL_COMMAND,
            Some((name, mention)) => {
                name == BILL_COMMAND
                    && self
                        .bot_username
                        .as_deref()
                        .is_some_and(|username| username.eq_ignore_ascii_case(mention))
            }
        }
    }
}

/// Where an event is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    RegisterChat,
    LeaveAddedChat,
    RelayCommand,
    StartDialog,
    NumericTurn,
    TextTurn,
    RelayMessage,
    ApprovalDecision,
    SkipTurn,
    SelectTurn,
    ConfirmationTurn,
    BrokenButton,
    Ignore,
}

/// What a rule sees: the event, the stage of the chat's session and the settings
type Predicate = fn(&InboundEvent, Option<Stage>, &RouterConfig) -> bool;

struct Rule {
    name: &'static str,
    matches: Predicate,
    route: Route,
}

fn valid_message<'a>(event: &'a InboundEvent, config: &RouterConfig) -> Option<&'a IncomingMessage> {
    match event {
        InboundEvent::Message(m) if config.is_valid_chat(m.chat) => Some(m),
        _ => None,
    }
}

fn click(event: &InboundEvent) -> Option<&ControlClick> {
    match event {
        InboundEvent::Click(c) => Some(c),
        _ => None,
    }
}

const RULES: &[Rule] = &[
    Rule {
        name: "chat created",
        matches: |event, _, config| {
            matches!(event, InboundEvent::ChatCreated { chat, .. } if config.is_valid_chat(*chat))
        },
        route: Route::RegisterChat,
    },
    Rule {
        name: "bot added to chat",
        matches: |event, _, config| match event {
            InboundEvent::MembersAdded { chat, members, .. } => {
                config.is_valid_chat(*chat) && members.contains(&config.bot_id)
            }
            _ => false,
        },
        route: Route::LeaveAddedChat,
    },
    Rule {
        name: "hashtag command",
        matches: |event, _, config| {
            valid_message(event, config)
                .and_then(|m| m.text.as_deref())
                .is_some_and(|text| text.starts_with(COMMAND_PREFIX))
        },
        route: Route::RelayCommand,
    },
    Rule {
        name: "bill command",
        matches: |event, _, config| {
            valid_message(event, config)
                .and_then(|m| m.text.as_deref())
                .is_some_and(|text| config.is_bill_command(text))
        },
        route: Route::StartDialog,
    },
    Rule {
        name: "numeric answer",
        matches: |event, stage, config| {
            valid_message(event, config).is_some_and(|m| m.text.is_some())
                && stage == Some(Stage::Awaiting(AnswerType::Numeric))
        },
        route: Route::NumericTurn,
    },
    Rule {
        name: "text answer",
        matches: |event, stage, config| {
            valid_message(event, config).is_some_and(|m| m.text.is_some())
                && stage == Some(Stage::Awaiting(AnswerType::Text))
        },
        route: Route::TextTurn,
    },
    Rule {
        name: "chat message",
        matches: |event, _, config| valid_message(event, config).is_some(),
        route: Route::RelayMessage,
    },
    Rule {
        name: "approval decision",
        matches: |event, _, _| click(event).is_some_and(|c| ApprovalToken::is_admin_token(&c.data)),
        route: Route::ApprovalDecision,
    },
    Rule {
        name: "skip",
        matches: |event, stage, _| {
            click(event).is_some_and(|c| c.data == SKIP_TOKEN)
                && matches!(stage, Some(Stage::Awaiting(_)))
        },
        route: Route::SkipTurn,
    },
    Rule {
        name: "select answer",
        matches: |event, stage, _| {
            click(event).is_some() && stage == Some(Stage::Awaiting(AnswerType::Select))
        },
        route: Route::SelectTurn,
    },
    Rule {
        name: "confirmation",
        matches: |event, stage, _| click(event).is_some() && stage == Some(Stage::Confirm),
        route: Route::ConfirmationTurn,
    },
];

fn fallback(event: &InboundEvent) -> Route {
    match event {
        InboundEvent::Click(_) => Route::BrokenButton,
        _ => Route::Ignore,
    }
}

/// Pick the route for an event
pub fn route(event: &InboundEvent, stage: Option<Stage>, config: &RouterConfig) -> Route {
    for rule in RULES {
        if (rule.matches)(event, stage, config) {
            tracing::trace!("Event matched rule {:?}", rule.name);
            return rule.route;
        }
    }
    fallback(event)
}

/// Conversation an event belongs to: admin clicks carry it in their token
pub fn conversation_of(event: &InboundEvent) -> ChatId {
    match event {
        InboundEvent::Click(c) => ApprovalToken::parse(&c.data)
            .map(|token| token.chat_id)
            .unwrap_or(c.chat.id),
        other => other.chat().id,
    }
}

/// Entry point for every inbound event
pub struct Router {
    config: RouterConfig,
    engine: DialogEngine,
    chat_events: ChatEvents,
    transport: Arc<dyn ChatTransport>,
    sessions: Arc<dyn SessionStore>,
    locks: Mutex<HashMap<ChatId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        backend: Arc<dyn Backend>,
        transport: Arc<dyn ChatTransport>,
        sessions: Arc<dyn SessionStore>,
        admin_chat_id: ChatId,
    ) -> Self {
        let engine = DialogEngine::new(
            backend.clone(),
            transport.clone(),
            sessions.clone(),
            admin_chat_id,
        );
        let chat_events = ChatEvents::new(backend, transport.clone());
        Self {
            config,
            engine,
            chat_events,
            transport,
            sessions,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Route and handle one event. Handler errors are logged, not returned.
    pub async fn dispatch(&self, event: &InboundEvent) -> Route {
        let conversation = conversation_of(event);
        let lock = self
            .locks
            .lock()
            .entry(conversation)
            .or_default()
            .clone();

        let route = {
            let _turn = lock.lock().await;
            let stage = self.sessions.get(event.chat().id).map(|s| s.stage());
            let route = route(event, stage, &self.config);
            tracing::debug!(
                "Chat {} (stage {:?}) routed to {:?}",
                event.chat().id,
                stage,
                route
            );

            if let Err(e) = self.handle(route, event).await {
                tracing::error!("{:?} failed in chat {}: {}", route, event.chat().id, e);
            }
            route
        };

        drop(lock);
        self.locks.lock().retain(|_, l| Arc::strong_count(l) > 1);
        route
    }

    async fn handle(&self, route: Route, event: &InboundEvent) -> Result<()> {
        match (route, event) {
            (Route::RegisterChat, InboundEvent::ChatCreated { chat, from }) => {
                self.chat_events.register_chat(*chat, *from).await
            }
            (Route::LeaveAddedChat, InboundEvent::MembersAdded { chat, .. }) => {
                self.chat_events.leave_added_chat(*chat).await
            }
            (Route::RelayCommand, InboundEvent::Message(m)) => {
                self.chat_events.relay_command(m).await
            }
            (Route::StartDialog, InboundEvent::Message(m)) => self.engine.start(m).await,
            (Route::NumericTurn, InboundEvent::Message(m)) => self.engine.handle_numeric(m).await,
            (Route::TextTurn, InboundEvent::Message(m)) => self.engine.handle_text(m).await,
            (Route::RelayMessage, InboundEvent::Message(m)) => {
                self.chat_events.relay_message(m).await
            }
            (Route::ApprovalDecision, InboundEvent::Click(c)) => {
                self.engine.approval().handle_decision(c).await
            }
            (Route::SkipTurn, InboundEvent::Click(c)) => self.engine.handle_skip(c).await,
            (Route::SelectTurn, InboundEvent::Click(c)) => self.engine.handle_select(c).await,
            (Route::ConfirmationTurn, InboundEvent::Click(c)) => {
                self.engine.handle_confirmation(c).await
            }
            (Route::BrokenButton, InboundEvent::Click(c)) => {
                self.transport.delete_message(c.chat.id, c.message_id).await?;
                self.transport
                    .acknowledge(&c.click_id, Acknowledgement::Alert(texts::BUTTON_BROKEN.into()))
                    .await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{CONFIRM_TOKEN, SKIP_TOKEN};
    use crate::session::InMemorySessionStore;
    use crate::test_support::{
        ADMIN_CHAT, ADMIN_USER, CHAT, Call, MockBackend, MockTransport, USER, click, counterparty,
        group, numeric_question, select_question, text_question, typed,
    };
    use billbot_backend::{OrderOutcome, QuestionDefinition};

    const BOT: UserId = 42;
    const HOME: ChatId = 500;

    fn config() -> RouterConfig {
        RouterConfig {
            bot_id: BOT,
            bot_username: Some("BillBot".into()),
            home_chat_id: HOME,
        }
    }

    fn message(text: &str) -> InboundEvent {
        InboundEvent::Message(typed(USER, 10, text))
    }

    fn tap(data: &str) -> InboundEvent {
        InboundEvent::Click(click(USER, CHAT, 100, data))
    }

    #[test]
    fn test_bill_command_variants() {
        let config = config();
        assert!(config.is_bill_command("/bill"));
        assert!(config.is_bill_command("/bill@billbot"));
        assert!(config.is_bill_command("/bill now"));
        assert!(!config.is_bill_command("/bill@otherbot"));
        assert!(!config.is_bill_command("/billing"));
        assert!(!config.is_bill_command("bill"));
    }

    #[test]
    fn test_message_routes() {
        let c = config();
        let numeric = Some(Stage::Awaiting(AnswerType::Numeric));
        let text = Some(Stage::Awaiting(AnswerType::Text));

        assert_eq!(route(&message("##price"), numeric, &c), Route::RelayCommand);
        assert_eq!(route(&message("/bill"), numeric, &c), Route::StartDialog);
        assert_eq!(route(&message("12"), numeric, &c), Route::NumericTurn);
        assert_eq!(route(&message("hello"), text, &c), Route::TextTurn);
        assert_eq!(route(&message("hello"), None, &c), Route::RelayMessage);
        assert_eq!(
            route(&message("hello"), Some(Stage::Confirm), &c),
            Route::RelayMessage
        );
    }

    #[test]
    fn test_media_during_typed_question_is_relayed() {
        let c = config();
        let mut photo = typed(USER, 10, "");
        photo.text = None;
        photo.caption = Some("invoice scan".into());
        let photo = InboundEvent::Message(photo);

        for kind in [AnswerType::Text, AnswerType::Numeric] {
            assert_eq!(
                route(&photo, Some(Stage::Awaiting(kind)), &c),
                Route::RelayMessage
            );
        }
    }

    #[test]
    fn test_messages_outside_valid_chats_are_ignored() {
        let c = config();
        let mut private = typed(USER, 10, "/bill");
        private.chat.titled = false;
        assert_eq!(
            route(&InboundEvent::Message(private), None, &c),
            Route::Ignore
        );

        let mut home = typed(USER, 10, "/bill");
        home.chat.id = HOME;
        assert_eq!(route(&InboundEvent::Message(home), None, &c), Route::Ignore);
    }

    #[test]
    fn test_chat_membership_routes() {
        let c = config();
        let created = InboundEvent::ChatCreated {
            chat: group(CHAT),
            from: USER,
        };
        assert_eq!(route(&created, None, &c), Route::RegisterChat);

        let added = |members: Vec<UserId>| InboundEvent::MembersAdded {
            chat: group(CHAT),
            from: USER,
            members,
        };
        assert_eq!(route(&added(vec![9, BOT]), None, &c), Route::LeaveAddedChat);
        assert_eq!(route(&added(vec![9]), None, &c), Route::Ignore);
    }

    #[test]
    fn test_click_routes() {
        let c = config();
        let select = Some(Stage::Awaiting(AnswerType::Select));
        let numeric = Some(Stage::Awaiting(AnswerType::Numeric));

        assert_eq!(route(&tap("admin/-100/5"), select, &c), Route::ApprovalDecision);
        assert_eq!(route(&tap(SKIP_TOKEN), numeric, &c), Route::SkipTurn);
        assert_eq!(route(&tap(SKIP_TOKEN), select, &c), Route::SkipTurn);
        assert_eq!(route(&tap("2"), select, &c), Route::SelectTurn);
        assert_eq!(
            route(&tap(CONFIRM_TOKEN), Some(Stage::Confirm), &c),
            Route::ConfirmationTurn
        );
        assert_eq!(route(&tap("2"), numeric, &c), Route::BrokenButton);
        assert_eq!(route(&tap("2"), None, &c), Route::BrokenButton);
        assert_eq!(
            route(&tap(CONFIRM_TOKEN), Some(Stage::AwaitingApproval), &c),
            Route::BrokenButton
        );
    }

    #[test]
    fn test_admin_clicks_belong_to_token_conversation() {
        let event = InboundEvent::Click(click(ADMIN_USER, ADMIN_CHAT, 300, "admin/-100/reject"));
        assert_eq!(conversation_of(&event), CHAT);
        assert_eq!(conversation_of(&tap("2")), CHAT);
    }

    fn router(questions: Vec<QuestionDefinition>) -> (Arc<MockBackend>, Arc<MockTransport>, Router) {
        let backend = Arc::new(MockBackend::new(questions));
        let transport = Arc::new(MockTransport::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let router = Router::new(
            config(),
            backend.clone(),
            transport.clone(),
            sessions,
            ADMIN_CHAT,
        );
        (backend, transport, router)
    }

    #[tokio::test]
    async fn test_full_dialog_through_router() {
        let (backend, transport, router) = router(vec![
            select_question("sellers", true),
            numeric_question("amount", true, true),
        ]);
        *backend.snapshot.lock() = Some(vec![counterparty(5, "b5", "Лютик")]);
        *backend.order.lock() = Some(Ok(OrderOutcome::Document {
            path: "https://files/1.pdf".into(),
        }));

        assert_eq!(router.dispatch(&message("/bill")).await, Route::StartDialog);
        let anchor = 100;
        assert_eq!(
            router
                .dispatch(&InboundEvent::Click(click(USER, CHAT, anchor, "1")))
                .await,
            Route::SelectTurn
        );
        assert_eq!(
            router
                .dispatch(&InboundEvent::Message(typed(USER, 11, "12.5")))
                .await,
            Route::NumericTurn
        );
        assert_eq!(
            router
                .dispatch(&InboundEvent::Click(click(USER, CHAT, anchor, CONFIRM_TOKEN)))
                .await,
            Route::ConfirmationTurn
        );
        assert_eq!(
            router
                .dispatch(&InboundEvent::Click(click(ADMIN_USER, ADMIN_CHAT, 101, "admin/-100/5")))
                .await,
            Route::ApprovalDecision
        );

        assert_eq!(transport.documents(), 1);
        assert_eq!(backend.count("submit_order"), 1);
        assert!(router.locks.lock().is_empty());
        // the dialog is over; the same button is now stale
        assert_eq!(
            router
                .dispatch(&InboundEvent::Click(click(USER, CHAT, anchor, CONFIRM_TOKEN)))
                .await,
            Route::BrokenButton
        );
        assert!(transport.calls().contains(&Call::Delete {
            chat: CHAT,
            message: anchor
        }));
    }

    #[tokio::test]
    async fn test_caption_only_message_does_not_answer() {
        let (backend, _, router) = router(vec![text_question("comment", true, true)]);
        router.dispatch(&message("/bill")).await;

        let mut photo = typed(USER, 11, "");
        photo.text = None;
        photo.caption = Some("invoice scan".into());
        assert_eq!(
            router.dispatch(&InboundEvent::Message(photo)).await,
            Route::RelayMessage
        );

        assert_eq!(backend.relayed.lock().len(), 1);
        let session = router.sessions.get(CHAT).unwrap();
        assert_eq!(session.stage(), Stage::Awaiting(AnswerType::Text));
        assert!(session.collected_answers().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_start_still_routes() {
        let (backend, transport, router) = router(vec![]);
        let event = InboundEvent::Message(typed(USER, 10, "/bill"));
        // no question scripted: the dialog aborts and dispatch still returns
        assert_eq!(router.dispatch(&event).await, Route::StartDialog);
        assert_eq!(backend.count("next_question"), 1);
        assert_eq!(transport.sent_to(CHAT), vec![texts::DATA_ERROR.to_string()]);
    }
}
