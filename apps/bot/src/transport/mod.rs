//! Chat transport seam.
//!
//! The conversation core only sees `InboundEvent`s and talks back through
//! `ChatTransport`. `telegram` is the production adapter; tests use an
//! in-memory fake.

pub mod telegram;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::render::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a message the bot can edit later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// An inline button: visible label plus the opaque token sent back on press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub token: String,
}

impl Button {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// A file attached to an inbound message. Bytes are fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_id: String,
    pub file_name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    Command(Command),
    Callback {
        callback_id: String,
        token: String,
        origin: Option<MessageRef>,
    },
    Message {
        text: Option<String>,
        attachment: Option<Attachment>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub kind: InboundKind,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code:?}): {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("file {0} is not available for download")]
    FileUnavailable(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[Button],
    ) -> Result<MessageRef, TransportError>;

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), TransportError>;

    async fn send_document(&self, chat_id: ChatId, artifact: &Artifact)
        -> Result<(), TransportError>;

    /// Acknowledges a button press so the client stops showing a spinner.
    async fn acknowledge(&self, callback_id: &str) -> Result<(), TransportError>;

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Bytes, TransportError>;
}
