//! Administrator approval of a confirmed bill.
//!
//! The approval request is posted to a separate admin chat, so the usual
//! identity check cannot apply: the click comes from another user, in
//! another chat, on another message. Instead every control token carries
//! the id of the conversation it belongs to and only conversations that
//! are waiting for approval are resolved.

use std::fmt;
use std::sync::Arc;

use billbot_backend::{
    Backend, BalanceRecord, ChatId, CounterpartyRecord, Identity, MessageId, OrderOutcome,
    scalar_text,
};

use crate::{
    engine::abort_dialog,
    error::Result,
    event::ControlClick,
    session::{ConversationId, ConversationSession, SessionStore, Stage},
    texts,
    transport::{Acknowledgement, ChatTransport, Control},
};

const TOKEN_PREFIX: &str = "admin/";
const REJECT_SENTINEL: &str = "reject";
const MISSING_FIELD: &str = "---";

/// What the administrator chose
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Approve and bill the counterparty with this id
    Accept(String),
    Reject,
}

/// Control token of the admin message: `admin/<chat>/<counterparty|reject>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalToken {
    pub chat_id: ConversationId,
    pub decision: ApprovalDecision,
}

impl ApprovalToken {
    pub fn accept(chat_id: ConversationId, counterparty: impl Into<String>) -> Self {
        Self {
            chat_id,
            decision: ApprovalDecision::Accept(counterparty.into()),
        }
    }

    pub fn reject(chat_id: ConversationId) -> Self {
        Self {
            chat_id,
            decision: ApprovalDecision::Reject,
        }
    }

    /// Parse a click token; `None` unless it is a well-formed admin token
    pub fn parse(data: &str) -> Option<Self> {
        let rest = data.strip_prefix(TOKEN_PREFIX)?;
        let (chat, choice) = rest.split_once('/')?;
        let chat_id = chat.parse().ok()?;
        match choice {
            "" => None,
            REJECT_SENTINEL => Some(Self::reject(chat_id)),
            id => Some(Self::accept(chat_id, id)),
        }
    }

    /// Whether `data` is meant for the approval handler at all
    pub fn is_admin_token(data: &str) -> bool {
        data.starts_with(TOKEN_PREFIX)
    }
}

impl fmt::Display for ApprovalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.decision {
            ApprovalDecision::Accept(id) => write!(f, "{}{}/{}", TOKEN_PREFIX, self.chat_id, id),
            ApprovalDecision::Reject => {
                write!(f, "{}{}/{}", TOKEN_PREFIX, self.chat_id, REJECT_SENTINEL)
            }
        }
    }
}

/// Copy each balance onto the counterparties sharing its `bill`
pub fn merge_balances(records: &mut [CounterpartyRecord], balances: &[BalanceRecord]) {
    for balance in balances {
        for record in records.iter_mut().filter(|r| r.bill == balance.bill) {
            record.current_sum = Some(balance.current_sum.clone());
        }
    }
}

/// Button label of a counterparty in the admin message
pub fn counterparty_label(record: &CounterpartyRecord) -> String {
    let name = record
        .name
        .strip_prefix("ОАО ")
        .or_else(|| record.name.strip_prefix("КБ "))
        .unwrap_or(&record.name);
    let field = |value: &Option<serde_json::Value>| {
        value
            .as_ref()
            .map(scalar_text)
            .unwrap_or_else(|| MISSING_FIELD.to_string())
    };
    format!(
        "{} : {} : {}",
        name,
        field(&record.date_add_current_sum),
        field(&record.current_sum)
    )
}

/// The message posted to the admin chat
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub conversation_id: ConversationId,
    pub text: String,
    pub controls: Vec<Control>,
}

impl ApprovalRequest {
    /// Build the request from a session that holds its counterparties
    pub fn compile(session: &ConversationSession) -> Self {
        let chat = session.conversation_id();
        let mut controls: Vec<Control> = session
            .counterparties()
            .iter()
            .map(|record| {
                Control::new(
                    counterparty_label(record),
                    ApprovalToken::accept(chat, record.token()).to_string(),
                )
            })
            .collect();
        controls.push(Control::new(
            texts::REJECT,
            ApprovalToken::reject(chat).to_string(),
        ));

        Self {
            conversation_id: chat,
            text: session.summary(texts::APPROVAL_HEADER),
            controls,
        }
    }
}

/// Posts confirmed bills to the admin chat and resolves the decisions
#[derive(Clone)]
pub struct ApprovalCoordinator {
    backend: Arc<dyn Backend>,
    transport: Arc<dyn ChatTransport>,
    sessions: Arc<dyn SessionStore>,
    admin_chat_id: ChatId,
}

impl ApprovalCoordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn ChatTransport>,
        sessions: Arc<dyn SessionStore>,
        admin_chat_id: ChatId,
    ) -> Self {
        Self {
            backend,
            transport,
            sessions,
            admin_chat_id,
        }
    }

    /// The user said "yes": collect counterparties and ask the administrators
    pub async fn request_approval(
        &self,
        mut session: ConversationSession,
        click: &ControlClick,
    ) -> Result<()> {
        let chat = session.conversation_id();
        let identity = session.identity();

        let mut records = match self
            .backend
            .admin_snapshot(identity, session.collected_answers())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                self.remove_prompt(chat, click.message_id).await;
                return abort_dialog(self.transport.as_ref(), self.sessions.as_ref(), chat, e)
                    .await;
            }
        };
        let balances = match self.backend.balances(identity).await {
            Ok(balances) => balances,
            Err(e) => {
                self.remove_prompt(chat, click.message_id).await;
                return abort_dialog(self.transport.as_ref(), self.sessions.as_ref(), chat, e)
                    .await;
            }
        };
        tracing::debug!(
            "Chat {}: {} counterparties, {} balances",
            chat,
            records.len(),
            balances.len()
        );
        merge_balances(&mut records, &balances);

        session.await_approval(records);
        let request = ApprovalRequest::compile(&session);
        let waiting_text = format!(
            "{}\n\n{}",
            session.summary(texts::CONFIRM_HEADER),
            texts::AWAIT_ADMIN
        );

        let admin_message = match self
            .transport
            .send_message(self.admin_chat_id, &request.text, &request.controls)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Could not post approval request for chat {}: {}", chat, e);
                self.sessions.delete(chat);
                self.remove_prompt(chat, click.message_id).await;
                self.transport
                    .send_message(chat, texts::SERVER_RETRY, &[])
                    .await?;
                return Ok(());
            }
        };
        self.sessions.put(chat, session);
        tracing::info!(
            "Approval for chat {} requested in admin message {}",
            chat,
            admin_message
        );

        self.transport
            .acknowledge(
                &click.click_id,
                Acknowledgement::Alert(texts::APPROVAL_REQUESTED.into()),
            )
            .await?;
        self.transport
            .edit_message(chat, click.message_id, &waiting_text, &[])
            .await
    }

    /// A click on the admin message
    pub async fn handle_decision(&self, click: &ControlClick) -> Result<()> {
        if click.chat.id != self.admin_chat_id {
            tracing::warn!(
                "Approval click from chat {} outside the admin chat",
                click.chat.id
            );
            return self
                .transport
                .acknowledge(
                    &click.click_id,
                    Acknowledgement::Alert(texts::NO_ADMIN_RIGHTS.into()),
                )
                .await;
        }

        let Some(token) = ApprovalToken::parse(&click.data) else {
            tracing::warn!("Malformed approval token {:?}", click.data);
            return self.discard_admin_message(click, texts::BUTTON_BROKEN).await;
        };

        let session = match self.sessions.get(token.chat_id) {
            Some(session) if session.stage() == Stage::AwaitingApproval => session,
            _ => {
                tracing::info!("No pending approval for chat {}", token.chat_id);
                return self.discard_admin_message(click, texts::BUTTON_BROKEN).await;
            }
        };

        match token.decision {
            ApprovalDecision::Reject => self.reject(session, click).await,
            ApprovalDecision::Accept(counterparty) => {
                if session.counterparty(&counterparty).is_none() {
                    tracing::warn!(
                        "Counterparty {} was not offered for chat {}",
                        counterparty,
                        token.chat_id
                    );
                    return self
                        .transport
                        .acknowledge(
                            &click.click_id,
                            Acknowledgement::Alert(texts::BUTTON_BROKEN.into()),
                        )
                        .await;
                }
                self.accept(session, &counterparty, click).await
            }
        }
    }

    async fn reject(&self, session: ConversationSession, click: &ControlClick) -> Result<()> {
        let chat = session.conversation_id();
        tracing::info!("Bill for chat {} rejected by user {}", chat, click.from);
        self.sessions.delete(chat);
        self.close_admin_message(click).await;

        match session.anchor_message_id() {
            Some(anchor) => {
                self.transport
                    .edit_message(chat, anchor, texts::REQUEST_REJECTED, &[])
                    .await
            }
            None => {
                self.transport
                    .send_message(chat, texts::REQUEST_REJECTED, &[])
                    .await?;
                Ok(())
            }
        }
    }

    async fn accept(
        &self,
        session: ConversationSession,
        counterparty: &str,
        click: &ControlClick,
    ) -> Result<()> {
        let chat = session.conversation_id();
        let approver = Identity::new(self.admin_chat_id, click.from);
        let answers = session.answers_with_counterparty(counterparty);
        tracing::info!(
            "Bill for chat {} approved by user {} with counterparty {}",
            chat,
            click.from,
            counterparty
        );

        // ended before submission, so a repeated click finds nothing to approve
        self.sessions.delete(chat);
        let outcome = self.backend.submit_order(approver, &answers).await;
        self.close_admin_message(click).await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                return abort_dialog(self.transport.as_ref(), self.sessions.as_ref(), chat, e)
                    .await;
            }
        };

        match outcome {
            OrderOutcome::Document { path } => {
                self.transport
                    .send_document(chat, &path, &texts::document_caption(&path))
                    .await?;
                if let Some(anchor) = session.anchor_message_id() {
                    self.transport.delete_message(chat, anchor).await?;
                }
                Ok(())
            }
            OrderOutcome::Failed { message } => {
                tracing::warn!("Order for chat {} failed: {}", chat, message);
                self.transport.send_message(chat, &message, &[]).await?;
                Ok(())
            }
            OrderOutcome::NoDocument => {
                tracing::warn!("Order for chat {} produced no document", chat);
                self.transport
                    .send_message(chat, texts::NO_DOCUMENT, &[])
                    .await?;
                Ok(())
            }
        }
    }

    /// Answer the click and remove the admin message. Failures are only logged.
    async fn close_admin_message(&self, click: &ControlClick) {
        if let Err(e) = self
            .transport
            .acknowledge(&click.click_id, Acknowledgement::Silent)
            .await
        {
            tracing::warn!("Could not acknowledge approval click: {}", e);
        }
        if let Err(e) = self
            .transport
            .delete_message(click.chat.id, click.message_id)
            .await
        {
            tracing::warn!("Could not delete admin message {}: {}", click.message_id, e);
        }
    }

    async fn remove_prompt(&self, chat: ChatId, message: MessageId) {
        if let Err(e) = self.transport.delete_message(chat, message).await {
            tracing::warn!("Could not delete prompt {} in chat {}: {}", message, chat, e);
        }
    }

    async fn discard_admin_message(&self, click: &ControlClick, notice: &str) -> Result<()> {
        self.transport
            .delete_message(click.chat.id, click.message_id)
            .await?;
        self.transport
            .acknowledge(&click.click_id, Acknowledgement::Alert(notice.into()))
            .await
    }
}
