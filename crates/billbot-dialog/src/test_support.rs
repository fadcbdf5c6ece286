//! Recording mocks and fixtures shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use billbot_backend::{
    AccessDecision, AnswerType, Backend, BalanceRecord, ChatId, CounterpartyRecord, Identity,
    MessageId, OptionRecord, OrderOutcome, PreviousAnswer, QuestionDefinition, RelayedMessage,
    UserId,
};

use crate::engine::DialogEngine;
use crate::error::{Error, Result};
use crate::event::{ChatRef, ControlClick, IncomingMessage};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::transport::{Acknowledgement, ChatTransport, Control};

pub const CHAT: ChatId = -100;
pub const USER: UserId = 7;
pub const OTHER_USER: UserId = 8;
pub const ADMIN_CHAT: ChatId = -999;
pub const ADMIN_USER: UserId = 1;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn option(id: i64, fields: &[(&str, &str)]) -> OptionRecord {
    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    OptionRecord::new(id, map)
}

fn question(name: &str, answer_type: AnswerType, required: bool, last: bool) -> QuestionDefinition {
    QuestionDefinition {
        name: name.to_string(),
        prompt: format!("Pick {}", name),
        display_name: format!("Display {}", name),
        answer_type,
        required,
        last_question: last,
        options: Vec::new(),
    }
}

/// Select question with options A (id 1) and B (id 2)
pub fn select_question(name: &str, required: bool) -> QuestionDefinition {
    let mut q = question(name, AnswerType::Select, required, false);
    q.options = vec![option(1, &[("name", "A")]), option(2, &[("name", "B")])];
    q
}

pub fn numeric_question(name: &str, required: bool, last: bool) -> QuestionDefinition {
    question(name, AnswerType::Numeric, required, last)
}

pub fn text_question(name: &str, required: bool, last: bool) -> QuestionDefinition {
    question(name, AnswerType::Text, required, last)
}

pub fn counterparty(id: i64, bill: &str, name: &str) -> CounterpartyRecord {
    CounterpartyRecord {
        id: Value::from(id),
        bill: Value::from(bill),
        name: name.to_string(),
        date_add_current_sum: None,
        current_sum: None,
        extra: Map::new(),
    }
}

pub fn group(id: ChatId) -> ChatRef {
    ChatRef { id, titled: true }
}

pub fn typed(user: UserId, message_id: MessageId, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat: group(CHAT),
        from: user,
        message_id,
        text: Some(text.to_string()),
        caption: None,
        reply_to: None,
    }
}

pub fn click(user: UserId, chat: ChatId, message_id: MessageId, data: &str) -> ControlClick {
    ControlClick {
        click_id: format!("click-{}-{}", message_id, data),
        from: user,
        chat: group(chat),
        message_id,
        data: data.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        chat: ChatId,
        text: String,
        controls: Vec<Control>,
        id: MessageId,
    },
    Edit {
        chat: ChatId,
        message: MessageId,
        text: String,
        controls: Vec<Control>,
    },
    ClearControls {
        chat: ChatId,
        message: MessageId,
    },
    Delete {
        chat: ChatId,
        message: MessageId,
    },
    Ack {
        click_id: String,
        ack: Acknowledgement,
    },
    Document {
        chat: ChatId,
        url: String,
        caption: String,
    },
    Leave {
        chat: ChatId,
    },
}

/// Transport that records every call; sent messages get ids from 100 up
pub struct MockTransport {
    pub calls: Mutex<Vec<Call>>,
    next_id: AtomicI64,
    /// Make every acknowledgement fail
    pub fail_acks: AtomicBool,
    /// Make sends to this chat fail
    pub fail_sends_to: Mutex<Option<ChatId>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(100),
            fail_acks: AtomicBool::new(false),
            fail_sends_to: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn sent_to(&self, chat: ChatId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { chat: to, text, .. } if to == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_edit(&self) -> Option<Call> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| matches!(c, Call::Edit { .. }))
    }

    pub fn acks(&self) -> Vec<Acknowledgement> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Ack { ack, .. } => Some(ack),
                _ => None,
            })
            .collect()
    }

    pub fn documents(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Document { .. }))
            .count()
    }

    pub fn deleted(&self, chat: ChatId, message: MessageId) -> bool {
        self.calls()
            .contains(&Call::Delete { chat, message })
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        controls: &[Control],
    ) -> Result<MessageId> {
        if *self.fail_sends_to.lock() == Some(chat) {
            return Err(Error::transport(format!("chat {} unreachable", chat)));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(Call::Send {
            chat,
            text: text.to_string(),
            controls: controls.to_vec(),
            id,
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        controls: &[Control],
    ) -> Result<()> {
        self.calls.lock().push(Call::Edit {
            chat,
            message,
            text: text.to_string(),
            controls: controls.to_vec(),
        });
        Ok(())
    }

    async fn clear_controls(&self, chat: ChatId, message: MessageId) -> Result<()> {
        self.calls.lock().push(Call::ClearControls { chat, message });
        Ok(())
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()> {
        self.calls.lock().push(Call::Delete { chat, message });
        Ok(())
    }

    async fn acknowledge(&self, click_id: &str, ack: Acknowledgement) -> Result<()> {
        if self.fail_acks.load(Ordering::Relaxed) {
            return Err(Error::transport("query is too old"));
        }
        self.calls.lock().push(Call::Ack {
            click_id: click_id.to_string(),
            ack,
        });
        Ok(())
    }

    async fn send_document(&self, chat: ChatId, url: &str, caption: &str) -> Result<()> {
        self.calls.lock().push(Call::Document {
            chat,
            url: url.to_string(),
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn leave_chat(&self, chat: ChatId) -> Result<()> {
        self.calls.lock().push(Call::Leave { chat });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Scripted backend that records which operations were called
pub struct MockBackend {
    pub access: Mutex<AccessDecision>,
    pub questions: Mutex<VecDeque<billbot_backend::Result<QuestionDefinition>>>,
    /// `None` makes the snapshot request fail
    pub snapshot: Mutex<Option<Vec<CounterpartyRecord>>>,
    pub balances: Mutex<Vec<BalanceRecord>>,
    pub order: Mutex<Option<billbot_backend::Result<OrderOutcome>>>,
    pub chat_valid: Mutex<bool>,
    pub ops: Mutex<Vec<&'static str>>,
    pub question_requests: Mutex<Vec<(Vec<PreviousAnswer>, u32)>>,
    pub submitted: Mutex<Vec<(Identity, Vec<PreviousAnswer>)>>,
    pub relayed: Mutex<Vec<RelayedMessage>>,
}

impl MockBackend {
    pub fn new(questions: Vec<QuestionDefinition>) -> Self {
        Self {
            access: Mutex::new(AccessDecision::Granted),
            questions: Mutex::new(questions.into_iter().map(Ok).collect()),
            snapshot: Mutex::new(Some(Vec::new())),
            balances: Mutex::new(Vec::new()),
            order: Mutex::new(None),
            chat_valid: Mutex::new(true),
            ops: Mutex::new(Vec::new()),
            question_requests: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            relayed: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self, op: &str) -> usize {
        self.ops.lock().iter().filter(|o| **o == op).count()
    }

    fn record(&self, op: &'static str) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn access_check(&self, _identity: Identity) -> billbot_backend::Result<AccessDecision> {
        self.record("access_check");
        Ok(self.access.lock().clone())
    }

    async fn next_question(
        &self,
        _identity: Identity,
        answers: &[PreviousAnswer],
        index: u32,
    ) -> billbot_backend::Result<QuestionDefinition> {
        self.record("next_question");
        self.question_requests.lock().push((answers.to_vec(), index));
        self.questions.lock().pop_front().unwrap_or_else(|| {
            Err(billbot_backend::Error::UnexpectedResponse(
                "no more questions scripted".into(),
            ))
        })
    }

    async fn admin_snapshot(
        &self,
        _identity: Identity,
        _answers: &[PreviousAnswer],
    ) -> billbot_backend::Result<Vec<CounterpartyRecord>> {
        self.record("admin_snapshot");
        self.snapshot
            .lock()
            .clone()
            .ok_or_else(|| billbot_backend::Error::Status {
                status: 503,
                body: "unavailable".into(),
            })
    }

    async fn balances(&self, _identity: Identity) -> billbot_backend::Result<Vec<BalanceRecord>> {
        self.record("balances");
        Ok(self.balances.lock().clone())
    }

    async fn submit_order(
        &self,
        identity: Identity,
        answers: &[PreviousAnswer],
    ) -> billbot_backend::Result<OrderOutcome> {
        self.record("submit_order");
        self.submitted.lock().push((identity, answers.to_vec()));
        self.order.lock().take().unwrap_or(Ok(OrderOutcome::NoDocument))
    }

    async fn request_message_deletion(
        &self,
        _identity: Identity,
        _message_ids: &[MessageId],
    ) -> billbot_backend::Result<()> {
        self.record("request_message_deletion");
        Ok(())
    }

    async fn register_chat(&self, _identity: Identity) -> billbot_backend::Result<bool> {
        self.record("register_chat");
        Ok(*self.chat_valid.lock())
    }

    async fn relay_command(
        &self,
        _identity: Identity,
        command: &str,
    ) -> billbot_backend::Result<String> {
        self.record("relay_command");
        Ok(format!("saved {}", command))
    }

    async fn relay_message(
        &self,
        _identity: Identity,
        message: &RelayedMessage,
    ) -> billbot_backend::Result<()> {
        self.record("relay_message");
        self.relayed.lock().push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub transport: Arc<MockTransport>,
    pub sessions: Arc<InMemorySessionStore>,
    pub engine: DialogEngine,
}

impl Harness {
    pub fn new(questions: Vec<QuestionDefinition>) -> Self {
        let backend = Arc::new(MockBackend::new(questions));
        let transport = Arc::new(MockTransport::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let engine = DialogEngine::new(
            backend.clone(),
            transport.clone(),
            sessions.clone(),
            ADMIN_CHAT,
        );
        Self {
            backend,
            transport,
            sessions,
            engine,
        }
    }

    /// Run `/bill` as USER; returns the anchor id
    pub async fn start(&self) -> MessageId {
        self.engine.start(&typed(USER, 10, "/bill")).await.unwrap();
        self.sessions
            .get(CHAT)
            .and_then(|s| s.anchor_message_id())
            .expect("session with anchor")
    }
}
