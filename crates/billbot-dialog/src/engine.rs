//! Dialog engine: question sequencing and turn acceptance.
//!
//! The first question is always sent as a new message whose id becomes the
//! anchor; every later step edits that message in place. Any backend failure
//! ends the dialog, there is no retry of a single turn.

use std::sync::Arc;

use billbot_backend::{
    AccessDecision, AnswerType, AnswerValue, Backend, ChatId, FailureKind, Identity,
    QuestionDefinition, SKIPPED_ANSWER,
};

use crate::{
    approval::ApprovalCoordinator,
    error::{Error, Result},
    event::{ControlClick, IncomingMessage},
    guard::{self, TurnOrigin},
    render::{self, CANCEL_TOKEN, CONFIRM_TOKEN},
    session::{ConversationSession, SessionStore, Stage},
    texts,
    transport::{Acknowledgement, ChatTransport},
};

/// User-facing notice for a backend failure
pub fn failure_notice(error: &billbot_backend::Error) -> String {
    if let billbot_backend::Error::Terminated { reason, destroy } = error {
        return texts::terminated(reason, *destroy);
    }
    match error.kind() {
        FailureKind::MalformedResponse => texts::DATA_ERROR.to_string(),
        FailureKind::ServerUnavailable | FailureKind::ServerTerminated => {
            texts::SERVER_RETRY.to_string()
        }
    }
}

/// End the dialog in `chat` because of a backend failure
pub(crate) async fn abort_dialog(
    transport: &dyn ChatTransport,
    sessions: &dyn SessionStore,
    chat: ChatId,
    error: billbot_backend::Error,
) -> Result<()> {
    tracing::error!("Aborting bill dialog in chat {}: {}", chat, error);
    sessions.delete(chat);
    transport
        .send_message(chat, &failure_notice(&error), &[])
        .await?;
    Ok(())
}

/// Drives a bill dialog from `/bill` to the confirmation step
pub struct DialogEngine {
    backend: Arc<dyn Backend>,
    transport: Arc<dyn ChatTransport>,
    sessions: Arc<dyn SessionStore>,
    approval: ApprovalCoordinator,
}

impl DialogEngine {
    /// Create an engine; approval requests are posted to `admin_chat_id`
    pub fn new(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn ChatTransport>,
        sessions: Arc<dyn SessionStore>,
        admin_chat_id: ChatId,
    ) -> Self {
        let approval = ApprovalCoordinator::new(
            backend.clone(),
            transport.clone(),
            sessions.clone(),
            admin_chat_id,
        );
        Self {
            backend,
            transport,
            sessions,
            approval,
        }
    }

    /// The coordinator that resolves administrator decisions
    pub fn approval(&self) -> &ApprovalCoordinator {
        &self.approval
    }

    /// Handle `/bill`: check access, create the session and ask question 1
    pub async fn start(&self, command: &IncomingMessage) -> Result<()> {
        let chat = command.chat.id;
        let identity = Identity::new(chat, command.from);
        tracing::info!("User {} requested a bill in chat {}", command.from, chat);

        if let Some(existing) = self.sessions.get(chat) {
            if existing.authorized_user_id() != command.from {
                tracing::info!(
                    "Chat {} already has a dialog owned by user {}",
                    chat,
                    existing.authorized_user_id()
                );
                self.transport
                    .send_message(chat, texts::DIALOG_BUSY, &[])
                    .await?;
                return Ok(());
            }
            tracing::info!("Restarting bill dialog in chat {}", chat);
            self.sessions.delete(chat);
        }

        let decision = match self.backend.access_check(identity).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!("Access check failed: {}", e);
                self.transport
                    .send_message(chat, &failure_notice(&e), &[])
                    .await?;
                return Ok(());
            }
        };

        match decision {
            AccessDecision::Granted => {}
            AccessDecision::Denied => {
                tracing::info!("User {} was denied access", command.from);
                self.transport
                    .send_message(chat, texts::ACCESS_DENIED, &[])
                    .await?;
                return Ok(());
            }
            AccessDecision::ServerProblem(reason) => {
                tracing::info!("Problems connecting to server: {}", reason);
                self.transport
                    .send_message(chat, &texts::access_problem(&reason), &[])
                    .await?;
                if let Err(e) = self
                    .backend
                    .request_message_deletion(identity, &[command.message_id])
                    .await
                {
                    tracing::warn!("Could not request deletion of the command: {}", e);
                }
                return Ok(());
            }
        }

        if let Err(e) = self.transport.delete_message(chat, command.message_id).await {
            tracing::warn!("Could not delete /bill command in chat {}: {}", chat, e);
        }

        let mut session = ConversationSession::new(chat, command.from);
        let question = match self
            .backend
            .next_question(identity, &[], session.current_question_index())
            .await
        {
            Ok(question) => question,
            Err(e) => {
                return abort_dialog(self.transport.as_ref(), self.sessions.as_ref(), chat, e)
                    .await;
            }
        };

        let prompt = render::render_question(&question);
        let anchor = self
            .transport
            .send_message(chat, &prompt.text, &prompt.controls)
            .await?;
        session.set_anchor(anchor)?;
        tracing::debug!(
            "Question 1 ({}, {}) sent as message {}",
            question.name,
            question.answer_type.tag(),
            anchor
        );
        session.present_question(question);
        self.sessions.put(chat, session);
        Ok(())
    }

    /// A click on one of the options of a select question
    pub async fn handle_select(&self, click: &ControlClick) -> Result<()> {
        let Some(mut session) = self.admit_click(click).await? else {
            return Ok(());
        };
        let Some(option) = session
            .current_question()
            .and_then(|q| q.option_by_token(&click.data))
            .cloned()
        else {
            tracing::warn!("Unknown option token {:?} in chat {}", click.data, click.chat.id);
            self.transport
                .acknowledge(&click.click_id, Acknowledgement::Alert(texts::BUTTON_BROKEN.into()))
                .await?;
            return Ok(());
        };

        session.record_answer(AnswerValue::Token(click.data.clone()), option.display_text())?;
        self.accept_click(&session, click).await?;
        self.advance(session).await
    }

    /// A click on "skip" while an optional question is shown
    pub async fn handle_skip(&self, click: &ControlClick) -> Result<()> {
        let Some(mut session) = self.admit_click(click).await? else {
            return Ok(());
        };
        if session.current_question().is_none_or(|q| q.required) {
            tracing::warn!("Skip clicked on a required question in chat {}", click.chat.id);
            self.transport
                .acknowledge(&click.click_id, Acknowledgement::Alert(texts::BUTTON_BROKEN.into()))
                .await?;
            return Ok(());
        }

        session.record_answer(AnswerValue::Skipped, SKIPPED_ANSWER)?;
        self.accept_click(&session, click).await?;
        self.advance(session).await
    }

    /// A typed answer to a numeric question. Unparsable input is ignored.
    pub async fn handle_numeric(&self, message: &IncomingMessage) -> Result<()> {
        let Some(mut session) = self.admit_typed(message, AnswerType::Numeric).await? else {
            return Ok(());
        };
        let text = message.text.as_deref().unwrap_or_default();
        let Some(number) = text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
        else {
            tracing::debug!("Ignoring non-numeric answer {:?} in chat {}", text, message.chat.id);
            return Ok(());
        };

        session.record_answer(AnswerValue::Number(number), number.to_string())?;
        self.accept_typed(message).await;
        self.advance(session).await
    }

    /// A typed answer to a text question, taken verbatim
    pub async fn handle_text(&self, message: &IncomingMessage) -> Result<()> {
        let Some(mut session) = self.admit_typed(message, AnswerType::Text).await? else {
            return Ok(());
        };
        let text = message.text.clone().unwrap_or_default();

        session.record_answer(AnswerValue::Text(text.clone()), text)?;
        self.accept_typed(message).await;
        self.advance(session).await
    }

    /// "yes" or "no" on the confirmation prompt
    pub async fn handle_confirmation(&self, click: &ControlClick) -> Result<()> {
        let Some(session) = self.admit_click(click).await? else {
            return Ok(());
        };
        if session.stage() != Stage::Confirm {
            return Err(Error::Session(format!(
                "confirmation clicked in stage {:?}",
                session.stage()
            )));
        }

        match click.data.as_str() {
            CANCEL_TOKEN => {
                tracing::info!("Bill dialog in chat {} cancelled by user", click.chat.id);
                self.sessions.delete(session.conversation_id());
                self.transport
                    .delete_message(click.chat.id, click.message_id)
                    .await?;
                self.transport
                    .acknowledge(&click.click_id, Acknowledgement::Toast(texts::CANCELLED.into()))
                    .await?;
                Ok(())
            }
            CONFIRM_TOKEN => self.approval.request_approval(session, click).await,
            other => {
                tracing::debug!("Ignoring {:?} on the confirmation prompt", other);
                self.transport
                    .acknowledge(&click.click_id, Acknowledgement::Silent)
                    .await
            }
        }
    }

    /// Load the session for a click and run the identity check
    async fn admit_click(&self, click: &ControlClick) -> Result<Option<ConversationSession>> {
        let Some(session) = self.sessions.get(click.chat.id) else {
            tracing::debug!("No bill dialog in chat {}", click.chat.id);
            self.transport
                .acknowledge(&click.click_id, Acknowledgement::Alert(texts::BUTTON_BROKEN.into()))
                .await?;
            return Ok(None);
        };

        if let Err(rejection) = guard::validate(&TurnOrigin::from(click), &session) {
            tracing::info!(
                "Rejected click from user {} in chat {}: {:?}",
                click.from,
                click.chat.id,
                rejection
            );
            self.transport
                .acknowledge(&click.click_id, Acknowledgement::Alert(rejection.notice().into()))
                .await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Load the session for a typed answer and run the identity check
    async fn admit_typed(
        &self,
        message: &IncomingMessage,
        expected: AnswerType,
    ) -> Result<Option<ConversationSession>> {
        let Some(session) = self.sessions.get(message.chat.id) else {
            return Ok(None);
        };
        if session.stage() != Stage::Awaiting(expected) {
            tracing::debug!(
                "Typed answer in chat {} while in stage {:?}",
                message.chat.id,
                session.stage()
            );
            return Ok(None);
        }

        if let Err(rejection) = guard::validate(&TurnOrigin::from(message), &session) {
            tracing::info!(
                "Rejected answer from user {} in chat {}: {:?}",
                message.from,
                message.chat.id,
                rejection
            );
            self.transport
                .send_message(message.chat.id, rejection.notice(), &[])
                .await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Strip the answered controls and confirm the click
    async fn accept_click(&self, session: &ConversationSession, click: &ControlClick) -> Result<()> {
        if let Some(anchor) = session.anchor_message_id() {
            self.transport.clear_controls(click.chat.id, anchor).await?;
        }
        self.transport
            .acknowledge(&click.click_id, Acknowledgement::Toast(texts::ANSWER_ACCEPTED.into()))
            .await
    }

    /// Remove the typed answer from the chat
    async fn accept_typed(&self, message: &IncomingMessage) {
        if let Err(e) = self
            .transport
            .delete_message(message.chat.id, message.message_id)
            .await
        {
            tracing::warn!("Could not delete answer message {}: {}", message.message_id, e);
        }
    }

    /// Move on after an accepted turn: next question or confirmation
    async fn advance(&self, mut session: ConversationSession) -> Result<()> {
        let chat = session.conversation_id();
        let anchor = session.anchor_message_id().ok_or_else(|| {
            Error::Session(format!("conversation {} has no anchor message", chat))
        })?;
        tracing::debug!(
            "Chat {} advancing to question {} ({} answers collected)",
            chat,
            session.current_question_index(),
            session.collected_answers().len()
        );

        if session.last_question() {
            session.enter_confirmation();
            let prompt = render::render_confirmation(&session);
            self.sessions.put(chat, session);
            return self
                .transport
                .edit_message(chat, anchor, &prompt.text, &prompt.controls)
                .await;
        }

        let question: QuestionDefinition = match self
            .backend
            .next_question(
                session.identity(),
                session.collected_answers(),
                session.current_question_index(),
            )
            .await
        {
            Ok(question) => question,
            Err(e) => {
                return abort_dialog(self.transport.as_ref(), self.sessions.as_ref(), chat, e)
                    .await;
            }
        };

        let prompt = render::render_question(&question);
        session.present_question(question);
        self.sessions.put(chat, session);
        self.transport
            .edit_message(chat, anchor, &prompt.text, &prompt.controls)
            .await
    }
}
