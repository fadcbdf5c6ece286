//! Telegram Bot API transport

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

use billbot_backend::{ChatId, MessageId, UserId};
use billbot_dialog::{
    Acknowledgement, ChatRef, ChatTransport, Control, ControlClick, InboundEvent, IncomingMessage,
};

/// Extra time on top of the long-poll timeout before a request is abandoned
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} failed: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

impl From<TelegramError> for billbot_dialog::Error {
    fn from(e: TelegramError) -> Self {
        billbot_dialog::Error::transport(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub reply_to_message: Option<Box<Message>>,
    #[serde(default)]
    pub group_chat_created: bool,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

impl From<&Chat> for ChatRef {
    fn from(chat: &Chat) -> Self {
        ChatRef {
            id: chat.id,
            titled: chat.title.is_some(),
        }
    }
}

impl Update {
    /// The event this update carries, if the bot handles it at all
    pub fn into_event(self) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            let message = query.message?;
            return Some(InboundEvent::Click(ControlClick {
                click_id: query.id,
                from: query.from.id,
                chat: ChatRef::from(&message.chat),
                message_id: message.message_id,
                data: query.data?,
            }));
        }

        let message = self.message?;
        let from = message.from.as_ref()?.id;
        let chat = ChatRef::from(&message.chat);

        if message.group_chat_created {
            return Some(InboundEvent::ChatCreated { chat, from });
        }
        if !message.new_chat_members.is_empty() {
            return Some(InboundEvent::MembersAdded {
                chat,
                from,
                members: message.new_chat_members.iter().map(|u| u.id).collect(),
            });
        }

        Some(InboundEvent::Message(IncomingMessage {
            chat,
            from,
            message_id: message.message_id,
            text: message.text,
            caption: message.caption,
            reply_to: message.reply_to_message.map(|m| m.message_id),
        }))
    }
}

fn keyboard(controls: &[Control]) -> Value {
    let rows: Vec<Value> = controls
        .iter()
        .map(|c| json!([{ "text": c.label, "callback_data": c.token }]))
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Bot API client
pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramTransport {
    /// `api_url` is the Bot API root, e.g. `https://api.telegram.org`
    pub fn new(api_url: &str, token: &str, poll_timeout: Duration) -> Result<Self, TelegramError> {
        let client = reqwest::Client::builder()
            .timeout(poll_timeout + REQUEST_GRACE)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url, token),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &impl Serialize,
    ) -> Result<T, TelegramError> {
        let url = format!("{}/{}", self.base_url, method);
        tracing::trace!("Bot API call {}", method);
        let response: ApiResponse<T> = self.client.post(&url).json(body).send().await?.json().await?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(TelegramError::Api {
                method,
                description: description.unwrap_or_else(|| "no result".to_string()),
            }),
        }
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout.as_secs(),
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        controls: &[Control],
    ) -> billbot_dialog::Result<MessageId> {
        let mut body = json!({ "chat_id": chat, "text": text });
        if !controls.is_empty() {
            body["reply_markup"] = keyboard(controls);
        }
        let message: Message = self.call("sendMessage", &body).await?;
        Ok(message.message_id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        controls: &[Control],
    ) -> billbot_dialog::Result<()> {
        let body = json!({
            "chat_id": chat,
            "message_id": message,
            "text": text,
            "reply_markup": keyboard(controls),
        });
        let _: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn clear_controls(&self, chat: ChatId, message: MessageId) -> billbot_dialog::Result<()> {
        let body = json!({
            "chat_id": chat,
            "message_id": message,
            "reply_markup": keyboard(&[]),
        });
        let _: Value = self.call("editMessageReplyMarkup", &body).await?;
        Ok(())
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> billbot_dialog::Result<()> {
        let _: bool = self
            .call("deleteMessage", &json!({ "chat_id": chat, "message_id": message }))
            .await?;
        Ok(())
    }

    async fn acknowledge(&self, click_id: &str, ack: Acknowledgement) -> billbot_dialog::Result<()> {
        let body = match ack {
            Acknowledgement::Silent => json!({ "callback_query_id": click_id }),
            Acknowledgement::Toast(text) => {
                json!({ "callback_query_id": click_id, "text": text, "show_alert": false })
            }
            Acknowledgement::Alert(text) => {
                json!({ "callback_query_id": click_id, "text": text, "show_alert": true })
            }
        };
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    async fn send_document(&self, chat: ChatId, url: &str, caption: &str) -> billbot_dialog::Result<()> {
        let body = json!({ "chat_id": chat, "document": url, "caption": caption });
        let _: Value = self.call("sendDocument", &body).await?;
        Ok(())
    }

    async fn leave_chat(&self, chat: ChatId) -> billbot_dialog::Result<()> {
        let _: bool = self.call("leaveChat", &json!({ "chat_id": chat })).await?;
        Ok(())
    }
}
