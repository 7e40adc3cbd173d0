use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::llm_client::GeneratorError;
use crate::render::RenderError;
use crate::rewrite::RewriteError;
use crate::transport::TransportError;

/// Application-level error type.
///
/// Every per-event failure ends up here at the dispatcher boundary, where
/// `user_message` turns it into the text the user sees. Nothing in this enum
/// is allowed to stop the dispatcher.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Generator timed out")]
    GeneratorTimeout,

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RewriteError> for BotError {
    fn from(err: RewriteError) -> Self {
        match err {
            RewriteError::Generator(e) => BotError::Generator(e),
            RewriteError::Timeout(_) => BotError::GeneratorTimeout,
        }
    }
}

impl BotError {
    /// Text shown to the user for this failure. Server-side failures are
    /// logged here so the message itself can stay generic.
    pub fn user_message(&self) -> String {
        match self {
            BotError::InvalidInput(msg) => msg.clone(),
            BotError::Extraction(ExtractError::UnsupportedFormat { extension }) => {
                let shown = if extension.is_empty() {
                    "files without an extension".to_string()
                } else {
                    format!(".{extension} files")
                };
                format!("Sorry, {shown} aren't supported. Use PDF, DOCX, MD, or TXT.")
            }
            BotError::Extraction(ExtractError::TooLarge { limit, .. }) => format!(
                "That file is too large. Please keep uploads under {} KB.",
                limit / 1024
            ),
            BotError::Extraction(ExtractError::Timeout(_)) => {
                "Reading that file took too long. Try a smaller file or paste the text.".to_string()
            }
            BotError::Extraction(e) => {
                tracing::warn!("Extraction error: {e}");
                "I couldn't read that file. Check that it isn't corrupted, or paste the text instead."
                    .to_string()
            }
            BotError::Generator(e) => {
                tracing::error!("Generator error: {e}");
                "⚠️ The AI service couldn't rewrite your resume right now.".to_string()
            }
            BotError::GeneratorTimeout => {
                tracing::error!("Generator timed out");
                "⚠️ The AI service took too long to respond.".to_string()
            }
            BotError::Render(RenderError::UnsupportedCharacter { ch, .. }) => {
                tracing::error!("Render error: unsupported character {ch:?}");
                "⚠️ The rewritten resume contained characters I can't put in a PDF.".to_string()
            }
            BotError::Render(e) => {
                tracing::error!("Render error: {e}");
                "⚠️ I couldn't build the PDF for your resume.".to_string()
            }
            BotError::Transport(e) => {
                tracing::error!("Transport error: {e}");
                "⚠️ Something went wrong while talking to the chat service.".to_string()
            }
            BotError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                "⚠️ An internal error occurred. Please try again.".to_string()
            }
        }
    }
}

/// Error type for the HTTP routes.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
