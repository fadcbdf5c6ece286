//! Wire types exchanged with the billing backend

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Chat identifier as assigned by the messenger
pub type ChatId = i64;
/// User identifier as assigned by the messenger
pub type UserId = i64;
/// Message identifier, unique within a chat
pub type MessageId = i64;

/// Skipped optional answers are submitted with this placeholder
pub const SKIPPED_ANSWER: &str = "---";

/// The `data` object attached to every backend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

impl Identity {
    pub fn new(chat_id: ChatId, user_id: UserId) -> Self {
        Self { chat_id, user_id }
    }
}

/// Kind of answer a question expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnswerType {
    /// Pick one of the offered options
    Select,
    /// Type a decimal number
    Numeric,
    /// Type free text
    Text,
}

impl AnswerType {
    /// Parse the backend's type tag
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "list" => Ok(AnswerType::Select),
            "float" => Ok(AnswerType::Numeric),
            "text" => Ok(AnswerType::Text),
            other => Err(Error::UnknownAnswerType(other.to_string())),
        }
    }

    /// The backend's type tag
    pub fn tag(&self) -> &'static str {
        match self {
            AnswerType::Select => "list",
            AnswerType::Numeric => "float",
            AnswerType::Text => "text",
        }
    }
}

/// Render a JSON scalar the way it is shown to users and sent in tokens
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One selectable option of a select question
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct OptionRecord {
    /// Option identifier, echoed back as the answer token
    pub id: Value,
    /// Remaining fields in server order
    pub fields: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for OptionRecord {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        let id = map
            .get("id")
            .cloned()
            .ok_or_else(|| "option record without id".to_string())?;
        if id.is_object() || id.is_array() || id.is_null() {
            return Err(format!("option id is not a scalar: {}", id));
        }
        let fields = map.into_iter().filter(|(key, _)| key != "id").collect();
        Ok(Self { id, fields })
    }
}

impl OptionRecord {
    /// Create a record from an id and display fields (test and fixture helper)
    pub fn new(id: impl Into<Value>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Opaque control token for this option
    pub fn token(&self) -> String {
        scalar_text(&self.id)
    }

    /// Text of a single field, if present
    pub fn field(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(scalar_text)
    }

    /// All non-id fields joined with spaces
    pub fn display_text(&self) -> String {
        self.fields
            .values()
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A question as sent by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDefinition {
    /// Internal key used when submitting answers
    pub name: String,
    /// Prompt text shown to the user
    pub prompt: String,
    /// Human-readable name used in summaries
    pub display_name: String,
    pub answer_type: AnswerType,
    pub required: bool,
    /// Whether this is the final question of the form
    pub last_question: bool,
    /// Options, only meaningful for select questions
    pub options: Vec<OptionRecord>,
}

impl QuestionDefinition {
    /// Find an option by its control token
    pub fn option_by_token(&self, token: &str) -> Option<&OptionRecord> {
        self.options.iter().find(|o| o.token() == token)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireQuestion {
    name: String,
    question: String,
    #[serde(default)]
    name_ru: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    last_question: bool,
    #[serde(default)]
    data: Vec<OptionRecord>,
}

impl TryFrom<WireQuestion> for QuestionDefinition {
    type Error = Error;

    fn try_from(wire: WireQuestion) -> Result<Self> {
        Ok(Self {
            answer_type: AnswerType::from_tag(&wire.kind)?,
            name: wire.name,
            prompt: wire.question,
            display_name: wire.name_ru,
            required: wire.required,
            last_question: wire.last_question,
            options: wire.data,
        })
    }
}

/// Value of a collected answer
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerValue {
    /// Token of a chosen option
    Token(String),
    Number(f64),
    Text(String),
    /// Optional question left unanswered
    Skipped,
}

impl AnswerValue {
    /// Form-encoded representation
    pub fn form_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Token(s) | AnswerValue::Text(s) => f.write_str(s),
            AnswerValue::Number(n) => write!(f, "{}", n),
            AnswerValue::Skipped => f.write_str(SKIPPED_ANSWER),
        }
    }
}

impl Serialize for AnswerValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AnswerValue::Token(s) | AnswerValue::Text(s) => serializer.serialize_str(s),
            AnswerValue::Number(n) => serializer.serialize_f64(*n),
            AnswerValue::Skipped => serializer.serialize_str(SKIPPED_ANSWER),
        }
    }
}

/// A (name, value) pair submitted verbatim and in order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviousAnswer {
    pub name: String,
    pub value: AnswerValue,
}

impl PreviousAnswer {
    pub fn new(name: impl Into<String>, value: AnswerValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Outcome of the access check
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Granted,
    Denied,
    /// The server could not decide; carries its explanation
    ServerProblem(String),
}

/// A counterparty the order can be attributed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyRecord {
    pub id: Value,
    /// Key shared with the balances listing
    pub bill: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_add_current_sum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_sum: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CounterpartyRecord {
    /// Identifier used in approval tokens
    pub fn token(&self) -> String {
        scalar_text(&self.id)
    }
}

/// Balance of one counterparty account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub bill: Value,
    pub current_sum: Value,
}

/// Result of submitting an approved order
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    /// The document was generated and is available at `path`
    Document { path: String },
    /// The server refused the order and explained why
    Failed { message: String },
    /// The server accepted the order but produced no document
    NoDocument,
}

/// A chat message forwarded to the backend for archiving
#[derive(Debug, Clone, PartialEq)]
pub struct RelayedMessage {
    pub message_id: MessageId,
    pub text: String,
    /// Id of the replied-to message, or 0
    pub reply_to_message_id: MessageId,
}
