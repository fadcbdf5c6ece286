//! Conversation sessions and their in-memory store.
//!
//! A session lives from a granted access check until a terminal outcome
//! (cancel, completion or abort). Nothing is persisted; a restart loses
//! every dialog in flight.

use parking_lot::Mutex;
use std::collections::HashMap;

use billbot_backend::{
    AnswerType, AnswerValue, ChatId, CounterpartyRecord, Identity, MessageId, PreviousAnswer,
    QuestionDefinition, UserId,
};

use crate::error::{Error, Result};

/// Sessions are keyed by the chat the dialog runs in
pub type ConversationId = ChatId;

/// Name under which the approved counterparty is submitted
pub const COUNTERPARTY_ANSWER: &str = "bank_accountants";

/// Where a live session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Created, first question not shown yet
    Starting,
    /// Waiting for an answer of the given type
    Awaiting(AnswerType),
    /// All questions answered, waiting for yes/no
    Confirm,
    /// Posted to the admin channel, waiting for a decision
    AwaitingApproval,
}

/// State of one bill dialog
#[derive(Debug, Clone)]
pub struct ConversationSession {
    conversation_id: ConversationId,
    authorized_user_id: UserId,
    authorized_chat_id: ChatId,
    anchor_message_id: Option<MessageId>,
    current_question_index: u32,
    last_question: bool,
    current_question: Option<QuestionDefinition>,
    collected_answers: Vec<PreviousAnswer>,
    display_answers: Vec<(String, String)>,
    counterparties: Vec<CounterpartyRecord>,
    stage: Stage,
}

impl ConversationSession {
    /// Create a session for a user who just passed the access check
    pub fn new(chat_id: ChatId, user_id: UserId) -> Self {
        Self {
            conversation_id: chat_id,
            authorized_user_id: user_id,
            authorized_chat_id: chat_id,
            anchor_message_id: None,
            current_question_index: 1,
            last_question: false,
            current_question: None,
            collected_answers: Vec::new(),
            display_answers: Vec::new(),
            counterparties: Vec::new(),
            stage: Stage::Starting,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn authorized_user_id(&self) -> UserId {
        self.authorized_user_id
    }

    pub fn authorized_chat_id(&self) -> ChatId {
        self.authorized_chat_id
    }

    /// Identity the backend sees for this dialog
    pub fn identity(&self) -> Identity {
        Identity::new(self.authorized_chat_id, self.authorized_user_id)
    }

    pub fn anchor_message_id(&self) -> Option<MessageId> {
        self.anchor_message_id
    }

    pub fn current_question_index(&self) -> u32 {
        self.current_question_index
    }

    pub fn last_question(&self) -> bool {
        self.last_question
    }

    pub fn current_question(&self) -> Option<&QuestionDefinition> {
        self.current_question.as_ref()
    }

    pub fn collected_answers(&self) -> &[PreviousAnswer] {
        &self.collected_answers
    }

    /// Display name → value, in the order the questions were answered
    pub fn display_answers(&self) -> &[(String, String)] {
        &self.display_answers
    }

    pub fn counterparties(&self) -> &[CounterpartyRecord] {
        &self.counterparties
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Record the message that is edited turn by turn. Set exactly once.
    pub fn set_anchor(&mut self, message_id: MessageId) -> Result<()> {
        if let Some(existing) = self.anchor_message_id {
            return Err(Error::Session(format!(
                "anchor already set to {} for conversation {}",
                existing, self.conversation_id
            )));
        }
        self.anchor_message_id = Some(message_id);
        Ok(())
    }

    /// Make `question` the one awaiting an answer
    pub fn present_question(&mut self, question: QuestionDefinition) {
        if question.last_question {
            self.last_question = true;
        }
        self.stage = Stage::Awaiting(question.answer_type);
        self.current_question = Some(question);
    }

    /// Append the answer to the current question and move to the next index
    pub fn record_answer(&mut self, value: AnswerValue, display: impl Into<String>) -> Result<()> {
        let question = match (&self.stage, &self.current_question) {
            (Stage::Awaiting(_), Some(question)) => question,
            _ => {
                return Err(Error::Session(format!(
                    "no question awaiting an answer in conversation {}",
                    self.conversation_id
                )));
            }
        };

        let display = display.into();
        let name = question.name.clone();
        let display_name = question.display_name.clone();

        self.collected_answers.push(PreviousAnswer::new(name, value));
        match self
            .display_answers
            .iter_mut()
            .find(|(key, _)| *key == display_name)
        {
            Some(entry) => entry.1 = display,
            None => self.display_answers.push((display_name, display)),
        }
        self.current_question_index += 1;
        Ok(())
    }

    /// All questions answered; only yes/no is honored from now on
    pub fn enter_confirmation(&mut self) {
        self.current_question = None;
        self.stage = Stage::Confirm;
    }

    /// Hand the form over to the administrators
    pub fn await_approval(&mut self, counterparties: Vec<CounterpartyRecord>) {
        self.counterparties = counterparties;
        self.stage = Stage::AwaitingApproval;
    }

    /// Counterparty offered to the administrators, by token
    pub fn counterparty(&self, token: &str) -> Option<&CounterpartyRecord> {
        self.counterparties.iter().find(|c| c.token() == token)
    }

    /// The submitted answer list: every collected answer plus the chosen counterparty
    pub fn answers_with_counterparty(&self, counterparty: &str) -> Vec<PreviousAnswer> {
        let mut answers = self.collected_answers.clone();
        answers.push(PreviousAnswer::new(
            COUNTERPARTY_ANSWER,
            AnswerValue::Token(counterparty.to_string()),
        ));
        answers
    }

    /// Header followed by one `name: value` line per answer
    pub fn summary(&self, header: &str) -> String {
        let mut text = header.to_string();
        for (name, value) in &self.display_answers {
            text.push_str(&format!("\n{}: {}", name, value));
        }
        text
    }
}

/// Storage for live sessions.
///
/// Callers must deliver at most one turn at a time per conversation; the
/// store itself only guards its map.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: ConversationId) -> Option<ConversationSession>;
    fn put(&self, id: ConversationId, session: ConversationSession);
    fn delete(&self, id: ConversationId) -> Option<ConversationSession>;
}

/// Process-wide in-memory session map
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<ConversationId, ConversationSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: ConversationId) -> Option<ConversationSession> {
        self.sessions.lock().get(&id).cloned()
    }

    fn put(&self, id: ConversationId, session: ConversationSession) {
        self.sessions.lock().insert(id, session);
    }

    fn delete(&self, id: ConversationId) -> Option<ConversationSession> {
        self.sessions.lock().remove(&id)
    }
}
