//! Backend trait and its HTTP implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::{Error, Result},
    token::generate_token,
    types::{
        AccessDecision, BalanceRecord, CounterpartyRecord, Identity, MessageId, OrderOutcome,
        PreviousAnswer, QuestionDefinition, RelayedMessage, WireQuestion, scalar_text,
    },
};

/// Answer name whose value narrows the admin snapshot to one seller
const SELLER_ANSWER: &str = "sellers";

/// Trait for the billing backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Ask whether the user may start a bill in this chat
    async fn access_check(&self, identity: Identity) -> Result<AccessDecision>;

    /// Fetch question number `index` given the answers so far
    async fn next_question(
        &self,
        identity: Identity,
        answers: &[PreviousAnswer],
        index: u32,
    ) -> Result<QuestionDefinition>;

    /// Fetch the counterparties an administrator can attribute the order to
    async fn admin_snapshot(
        &self,
        identity: Identity,
        answers: &[PreviousAnswer],
    ) -> Result<Vec<CounterpartyRecord>>;

    /// Fetch current balances, keyed by `bill`
    async fn balances(&self, identity: Identity) -> Result<Vec<BalanceRecord>>;

    /// Submit the approved order
    async fn submit_order(
        &self,
        identity: Identity,
        answers: &[PreviousAnswer],
    ) -> Result<OrderOutcome>;

    /// Ask the server to remove messages from its chat archive
    async fn request_message_deletion(
        &self,
        identity: Identity,
        message_ids: &[MessageId],
    ) -> Result<()>;

    /// Register a freshly created chat; returns whether its creator is a valid admin
    async fn register_chat(&self, identity: Identity) -> Result<bool>;

    /// Forward a `##` command; returns the text to post back
    async fn relay_command(&self, identity: Identity, command: &str) -> Result<String>;

    /// Forward an ordinary chat message for archiving
    async fn relay_message(&self, identity: Identity, message: &RelayedMessage) -> Result<()>;
}

/// One URL per backend operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendEndpoints {
    pub access: String,
    pub question: String,
    pub order: String,
    pub admin_question: String,
    pub balances: String,
    pub delete: String,
    pub new_chat: String,
    pub command: String,
    pub message: String,
}

impl BackendEndpoints {
    /// Check that every endpoint is set
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("access", &self.access),
            ("question", &self.question),
            ("order", &self.order),
            ("admin_question", &self.admin_question),
            ("balances", &self.balances),
            ("delete", &self.delete),
            ("new_chat", &self.new_chat),
            ("command", &self.command),
            ("message", &self.message),
        ];
        for (name, url) in named {
            if url.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("endpoint '{}' is not set", name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Value,
    #[serde(default)]
    destroy: Value,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    error: Value,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    path: Option<String>,
}

/// JSON truthiness as the backend uses it for `error` flags
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Current date in the format the backend archives
fn request_date() -> String {
    chrono::Local::now().format("%d.%m.%Y %H:%M").to_string()
}

/// HTTP client for the billing backend
pub struct HttpBackend {
    client: reqwest::Client,
    endpoints: BackendEndpoints,
}

impl HttpBackend {
    /// Create a backend client for the given endpoints
    pub fn new(endpoints: BackendEndpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    /// Send a request and decode the JSON body, failing on non-success status
    async fn send_json(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Value> {
        let response = request.send().await.inspect_err(|e| {
            tracing::error!("Request to {} failed: {}", url, e);
        })?;

        let status = response.status();
        let text = response.text().await?;
        tracing::debug!("Response from {} ({}): {}", url, status, text);

        if !status.is_success() {
            tracing::error!("Request to {} returned {}: {}", url, status, text);
            return Err(Error::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    async fn post_form(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        tracing::debug!("POST {} params={:?}", url, params);
        self.send_json(self.client.post(url).form(params), url).await
    }

    /// Post a `code`-tagged event to one of the archive endpoints
    async fn post_code(&self, url: &str, code: &str, data: Value, user_id: i64) -> Result<Value> {
        let params = vec![
            ("code".to_string(), code.to_string()),
            ("token".to_string(), generate_token(user_id)),
            ("data".to_string(), data.to_string()),
        ];
        self.post_form(url, &params).await
    }

    fn dialog_params(
        identity: Identity,
        answers: &[PreviousAnswer],
        index: u32,
    ) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("data".to_string(), serde_json::to_string(&identity)?),
            ("previous_answers".to_string(), serde_json::to_string(answers)?),
            ("current_question".to_string(), index.to_string()),
            ("token".to_string(), generate_token(identity.user_id)),
        ])
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn access_check(&self, identity: Identity) -> Result<AccessDecision> {
        tracing::info!("Asking server whether user {} may start a bill", identity.user_id);
        let params = vec![
            ("current_question".to_string(), "1".to_string()),
            ("data".to_string(), serde_json::to_string(&identity)?),
            ("token".to_string(), generate_token(identity.user_id)),
        ];
        let body = self.post_form(&self.endpoints.access, &params).await?;
        let response: AccessResponse = serde_json::from_value(body)?;

        if response.result != Value::Bool(true) {
            return Ok(AccessDecision::ServerProblem(scalar_text(&response.data)));
        }
        if response.data == Value::Bool(true) {
            Ok(AccessDecision::Granted)
        } else {
            Ok(AccessDecision::Denied)
        }
    }

    async fn next_question(
        &self,
        identity: Identity,
        answers: &[PreviousAnswer],
        index: u32,
    ) -> Result<QuestionDefinition> {
        let params = Self::dialog_params(identity, answers, index)?;
        let body = self.post_form(&self.endpoints.question, &params).await?;
        let envelope: Envelope = serde_json::from_value(body)?;

        if is_truthy(&envelope.error) {
            return Err(Error::terminated(
                scalar_text(&envelope.data),
                envelope.destroy == Value::Bool(true),
            ));
        }

        let first = match envelope.data {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => {
                return Err(Error::UnexpectedResponse(format!(
                    "expected a non-empty question list, got {}",
                    other
                )));
            }
        };
        let wire: WireQuestion = serde_json::from_value(first)?;
        QuestionDefinition::try_from(wire)
    }

    async fn admin_snapshot(
        &self,
        identity: Identity,
        answers: &[PreviousAnswer],
    ) -> Result<Vec<CounterpartyRecord>> {
        let url = &self.endpoints.admin_question;
        let params = Self::dialog_params(identity, answers, answers.len() as u32 + 1)?;
        let mut request = self.client.get(url).form(&params);
        if let Some(seller) = answers.iter().find(|a| a.name == SELLER_ANSWER) {
            request = request.query(&[("seller_id", seller.value.form_value())]);
        }
        tracing::debug!("GET {} params={:?}", url, params);

        let body = self.send_json(request, url).await?;
        let records = body
            .get("data")
            .and_then(|d| d.get("data"))
            .cloned()
            .ok_or_else(|| Error::UnexpectedResponse("admin snapshot without data.data".into()))?;
        Ok(serde_json::from_value(records)?)
    }

    async fn balances(&self, identity: Identity) -> Result<Vec<BalanceRecord>> {
        let url = &self.endpoints.balances;
        let query = [
            ("data", serde_json::to_string(&identity)?),
            ("token", generate_token(identity.user_id)),
        ];
        tracing::debug!("POST {} (balances)", url);

        let body = self.send_json(self.client.post(url).query(&query), url).await?;
        let records = body
            .get("data")
            .cloned()
            .ok_or_else(|| Error::UnexpectedResponse("balances without data".into()))?;
        Ok(serde_json::from_value(records)?)
    }

    async fn submit_order(
        &self,
        identity: Identity,
        answers: &[PreviousAnswer],
    ) -> Result<OrderOutcome> {
        let mut params: Vec<(String, String)> = answers
            .iter()
            .map(|a| (a.name.clone(), a.value.form_value()))
            .collect();
        params.push(("data".to_string(), serde_json::to_string(&identity)?));
        params.push(("token".to_string(), generate_token(identity.user_id)));

        let body = self.post_form(&self.endpoints.order, &params).await?;
        let response: OrderResponse = serde_json::from_value(body)?;

        if is_truthy(&response.error) {
            return Ok(OrderOutcome::Failed {
                message: scalar_text(&response.data),
            });
        }
        match (response.data, response.path) {
            (Value::Bool(true), Some(path)) => Ok(OrderOutcome::Document { path }),
            _ => Ok(OrderOutcome::NoDocument),
        }
    }

    async fn request_message_deletion(
        &self,
        identity: Identity,
        message_ids: &[MessageId],
    ) -> Result<()> {
        tracing::info!("Asking server to delete messages {:?}", message_ids);
        let params = vec![
            ("type".to_string(), "bill".to_string()),
            ("data".to_string(), serde_json::to_string(&identity)?),
            ("messages".to_string(), serde_json::to_string(message_ids)?),
            ("token".to_string(), generate_token(identity.user_id)),
        ];
        let body = self.post_form(&self.endpoints.delete, &params).await?;
        let envelope: Envelope = serde_json::from_value(body)?;
        if is_truthy(&envelope.error) {
            return Err(Error::UnexpectedResponse(format!(
                "message deletion refused: {}",
                scalar_text(&envelope.error)
            )));
        }
        Ok(())
    }

    async fn register_chat(&self, identity: Identity) -> Result<bool> {
        let data = json!({
            "chat_id": identity.chat_id,
            "user_id": identity.user_id,
            "date": request_date(),
        });
        let body = self
            .post_code(&self.endpoints.new_chat, "newChat", data, identity.user_id)
            .await?;
        let valid = body
            .get("data")
            .and_then(|d| d.get("isValidAdmin"))
            .ok_or_else(|| Error::UnexpectedResponse("newChat without data.isValidAdmin".into()))?;
        Ok(matches!(valid, Value::Bool(true)) || valid.as_str() == Some("True"))
    }

    async fn relay_command(&self, identity: Identity, command: &str) -> Result<String> {
        let data = json!({
            "chat_id": identity.chat_id,
            "user_id": identity.user_id,
            "date": request_date(),
            "command": command,
        });
        let body = self
            .post_code(&self.endpoints.command, "addCommand", data, identity.user_id)
            .await?;
        Ok(body.get("data").map(scalar_text).unwrap_or_default())
    }

    async fn relay_message(&self, identity: Identity, message: &RelayedMessage) -> Result<()> {
        let data = json!({
            "text": message.text,
            "chat_id": identity.chat_id,
            "user_id": identity.user_id,
            "message_id": message.message_id,
            "reply_to_message_id": message.reply_to_message_id,
            "date": request_date(),
        });
        self.post_code(&self.endpoints.message, "addMessage", data, identity.user_id)
            .await?;
        Ok(())
    }
}
