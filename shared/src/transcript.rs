use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::rc::Rc;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::HttpMethod;
use crate::context::{decode_value, ClientContext};
use crate::error::{AppError, AppResult};
use crate::model::{CaseId, ChatId, EmergencyCase, Message};
use crate::CHAT_WINDOW_SECS;

/// The period during which a chat accepts new messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatWindow {
    pub opened_at: DateTime<Utc>,
    pub length: Duration,
}

impl ChatWindow {
    pub fn new(opened_at: DateTime<Utc>) -> Self {
        Self {
            opened_at,
            length: Duration::seconds(CHAT_WINDOW_SECS),
        }
    }

    pub fn closes_at(&self) -> DateTime<Utc> {
        self.opened_at + self.length
    }

    /// Whole seconds left at `now`, never negative.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.closes_at() - now).num_seconds().max(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining_secs(now) == 0
    }

    /// `HH:MM:SS`, hours not wrapped at 24.
    pub fn format_countdown(&self, now: DateTime<Utc>) -> String {
        let secs = self.remaining_secs(now);
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
    WrongChat,
}

/// Messages of the chat attached to one accepted case.
pub struct ChatTranscript {
    ctx: Rc<ClientContext>,
    case_id: CaseId,
    chat_id: ChatId,
    window: ChatWindow,
    messages: Vec<Message>,
    loaded: bool,
}

impl ChatTranscript {
    /// `None` unless the case is accepted and carries a chat.
    pub fn open(ctx: Rc<ClientContext>, case: &EmergencyCase) -> Option<Self> {
        if !case.has_chat() {
            return None;
        }
        let chat_id = case.chat_id()?.clone();
        let opened_at = case.chat_activated_at().unwrap_or_else(|| ctx.now());
        Some(Self {
            ctx,
            case_id: case.id.clone(),
            chat_id,
            window: ChatWindow::new(opened_at),
            messages: Vec::new(),
            loaded: false,
        })
    }

    pub fn case_id(&self) -> &CaseId {
        &self.case_id
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn window(&self) -> ChatWindow {
        self.window
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether the server history has been pulled at least once.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn remaining_secs(&self) -> i64 {
        self.window.remaining_secs(self.ctx.now())
    }

    pub fn countdown(&self) -> String {
        self.window.format_countdown(self.ctx.now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_secs() == 0
    }

    /// Replace the local messages with the server's history.
    #[instrument(skip(self), fields(chat_id = %self.chat_id))]
    pub async fn load(&mut self) -> AppResult<&[Message]> {
        let path = format!("/private-chat/{}", self.chat_id);
        let request = self.ctx.authorized(HttpMethod::Get, &path)?;
        let body = self
            .ctx
            .send_value(request, "Could not load the conversation")
            .await?;
        let history = decode_history(&path, body)?;

        self.messages.clear();
        for message in history {
            if self.append(message) == AppendOutcome::WrongChat {
                warn!("history contained a message from another chat");
            }
        }
        self.loaded = true;
        debug!(count = self.messages.len(), "conversation loaded");
        Ok(&self.messages)
    }

    /// Add a delivered message. Safe to call with the same message twice.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if message.chat_id != self.chat_id {
            return AppendOutcome::WrongChat;
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return AppendOutcome::Duplicate;
        }
        self.messages.push(message);
        AppendOutcome::Appended
    }

    /// Post a message as the signed-in user and keep the server's copy.
    #[instrument(skip(self, body), fields(chat_id = %self.chat_id))]
    pub async fn send(&mut self, body: &str) -> AppResult<Message> {
        if self.is_expired() {
            return Err(AppError::window_expired());
        }
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::validation("Message cannot be empty"));
        }

        let request = self
            .ctx
            .authorized(HttpMethod::Post, "/message")?
            .with_json(&json!({ "chat_id": self.chat_id, "message": body }))?;
        let reply = self
            .ctx
            .send_value(request, "Could not send the message")
            .await?;
        let message = decode_message("/message", reply)?;

        match self.append(message.clone()) {
            AppendOutcome::WrongChat => Err(AppError::unexpected_response(
                "/message",
                format!("reply belongs to chat {}", message.chat_id),
            )),
            _ => {
                info!(message_id = %message.id, "message sent");
                Ok(message)
            }
        }
    }
}

fn decode_message(endpoint: &str, value: Value) -> AppResult<Message> {
    match value.get("message") {
        Some(inner @ Value::Object(_)) => decode_value(endpoint, inner.clone()),
        _ => decode_value(endpoint, value),
    }
}

/// History arrives as a bare list, `{data: [...]}`, `{messages: [...]}` or
/// a chat object carrying its messages.
fn decode_history(endpoint: &str, value: Value) -> AppResult<Vec<Message>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    for candidate in [
        value.get("messages"),
        value.get("chat").and_then(|c| c.get("messages")),
        value.get("data").and_then(|d| d.get("messages")),
    ]
    .into_iter()
    .flatten()
    {
        if let Ok(messages) = serde_json::from_value(candidate.clone()) {
            return Ok(messages);
        }
    }
    decode_value(endpoint, value)
}
