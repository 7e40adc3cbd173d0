//! Telegram Bot API adapter over `reqwest`.
//!
//! Inbound updates arrive through long-polling `getUpdates`; outbound calls
//! map one-to-one onto `sendMessage`, `editMessageText`, `sendDocument`,
//! `answerCallbackQuery` and `getFile`.
//!
//! Request URLs embed the bot token, so every `reqwest::Error` is stripped of
//! its URL before it can reach a log line.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::render::Artifact;
use crate::transport::{
    Attachment, Button, ChatId, ChatTransport, Command, InboundEvent, InboundKind, MessageRef,
    TransportError, UserId,
};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub document: Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

impl Update {
    /// Maps a raw update onto the transport-neutral event, dropping update
    /// kinds the bot does not handle.
    pub fn into_event(self) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            let origin = query.message.as_ref().map(|m| MessageRef {
                chat_id: ChatId(m.chat.id),
                message_id: m.message_id,
            });
            return Some(InboundEvent {
                user_id: UserId(query.from.id),
                chat_id: origin.map_or(ChatId(query.from.id), |o| o.chat_id),
                kind: InboundKind::Callback {
                    callback_id: query.id,
                    token: query.data.unwrap_or_default(),
                    origin,
                },
            });
        }

        let message = self.message?;
        let user_id = UserId(message.from.as_ref()?.id);
        let chat_id = ChatId(message.chat.id);

        let kind = match message.text.as_deref().and_then(parse_command) {
            Some(command) => InboundKind::Command(command),
            None => InboundKind::Message {
                text: message.text,
                attachment: message.document.map(|doc| Attachment {
                    file_id: doc.file_id,
                    file_name: doc.file_name.unwrap_or_default(),
                    size: doc.file_size,
                }),
            },
        };

        Some(InboundEvent {
            user_id,
            chat_id,
            kind,
        })
    }
}

/// Recognises `/start` and `/start@SomeBot`, with or without a payload.
fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split_once('@').map_or(name, |(name, _)| name);
    match name {
        "start" => Some(Command::Start),
        _ => None,
    }
}

fn reply_markup(buttons: &[Button]) -> Option<Value> {
    if buttons.is_empty() {
        return None;
    }
    let rows: Vec<Value> = buttons
        .iter()
        .map(|b| json!([{ "text": b.label, "callback_data": b.token }]))
        .collect();
    Some(json!({ "inline_keyboard": rows }))
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

pub struct TelegramTransport {
    client: Client,
    token: String,
    poll_timeout_secs: u64,
}

impl TelegramTransport {
    pub fn new(token: String, poll_timeout_secs: u64) -> Result<Self, TransportError> {
        let client = Client::builder()
            // Must outlast the long-poll window.
            .timeout(Duration::from_secs(poll_timeout_secs + 60))
            .build()
            .map_err(|e| TransportError::Http(e.without_url()))?;
        Ok(Self {
            client,
            token,
            poll_timeout_secs,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{TELEGRAM_API_BASE}/bot{}/{method}", self.token)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TransportError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.without_url()))?;
        parse_response(response).await
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();
    let body: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| TransportError::Http(e.without_url()))?;

    match (body.ok, body.result) {
        (true, Some(result)) => Ok(result),
        (_, _) => Err(TransportError::Api {
            code: body.error_code.or(Some(i64::from(status.as_u16()))),
            description: body
                .description
                .unwrap_or_else(|| "response carried no result".to_string()),
        }),
    }
}

fn is_not_modified(err: &TransportError) -> bool {
    matches!(err, TransportError::Api { description, .. } if description.contains("message is not modified"))
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[Button],
    ) -> Result<MessageRef, TransportError> {
        let mut body = json!({ "chat_id": chat_id.0, "text": text });
        if let Some(markup) = reply_markup(buttons) {
            body["reply_markup"] = markup;
        }
        let sent: Message = self.call("sendMessage", &body).await?;
        Ok(MessageRef {
            chat_id: ChatId(sent.chat.id),
            message_id: sent.message_id,
        })
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), TransportError> {
        let mut body = json!({
            "chat_id": message.chat_id.0,
            "message_id": message.message_id,
            "text": text,
        });
        if let Some(markup) = reply_markup(buttons) {
            body["reply_markup"] = markup;
        }
        // Result is the edited Message, or `true` for inline messages.
        match self.call::<Value>("editMessageText", &body).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_modified(&e) => {
                debug!("Edit skipped, message already shows this text");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        artifact: &Artifact,
    ) -> Result<(), TransportError> {
        let part = Part::bytes(artifact.bytes.to_vec())
            .file_name(artifact.file_name.clone())
            .mime_str("application/pdf")
            .map_err(|e| TransportError::Http(e.without_url()))?;
        let form = Form::new()
            .text("chat_id", chat_id.0.to_string())
            .text("caption", artifact.caption.clone())
            .part("document", part);

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.without_url()))?;
        let _sent: Message = parse_response(response).await?;
        Ok(())
    }

    async fn acknowledge(&self, callback_id: &str) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Bytes, TransportError> {
        let info: FileInfo = self
            .call("getFile", &json!({ "file_id": attachment.file_id }))
            .await?;
        let path = info
            .file_path
            .ok_or_else(|| TransportError::FileUnavailable(attachment.file_name.clone()))?;

        let url = format!("{TELEGRAM_API_BASE}/file/bot{}/{path}", self.token);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::Http(e.without_url()))?;
        response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.without_url()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Polling loop
// ────────────────────────────────────────────────────────────────────────────

/// Long-polls for updates and hands each one to the dispatcher.
///
/// Transient failures back off exponentially (1s, 2s, 4s … capped at 30s).
/// An unauthorized token is fatal.
pub async fn run_polling(transport: &TelegramTransport, dispatcher: &Dispatcher) -> Result<()> {
    let mut offset = 0i64;
    let mut backoff = Duration::from_secs(1);
    info!("Polling for updates (timeout {}s)", transport.poll_timeout_secs);

    loop {
        let updates = match transport.get_updates(offset).await {
            Ok(updates) => {
                backoff = Duration::from_secs(1);
                updates
            }
            Err(TransportError::Api {
                code: Some(401), ..
            }) => bail!("Telegram rejected the bot token (401 Unauthorized)"),
            Err(e) => {
                warn!("getUpdates failed: {e}; retrying in {}s", backoff.as_secs());
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            match update.into_event() {
                Some(event) => dispatcher.dispatch(event),
                None => debug!("Ignoring unsupported update {}", offset - 1),
            }
        }
    }
}
