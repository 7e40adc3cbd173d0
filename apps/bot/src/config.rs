use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::extract::MarkdownMode;

const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Application configuration loaded from environment variables.
/// Startup fails if either secret is missing.
#[derive(Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub port: u16,
    pub rust_log: String,
    /// Upper bound on a single generator call, including the HTTP round trip.
    pub generator_timeout: Duration,
    /// Upper bound on parsing one uploaded file.
    pub extraction_timeout: Duration,
    /// Long-poll window passed to `getUpdates`.
    pub poll_timeout_secs: u64,
    pub max_upload_bytes: u64,
    /// `None` disables idle-session expiry.
    pub session_ttl: Option<Duration>,
    pub markdown_mode: MarkdownMode,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session_ttl_secs: u64 = parse_or(&lookup, "SESSION_TTL_SECS", 86_400)?;

        Ok(Config {
            telegram_bot_token: require(&lookup, "TELEGRAM_BOT_TOKEN")?,
            gemini_api_key: require(&lookup, "GEMINI_API_KEY")?,
            gemini_model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            generator_timeout: Duration::from_secs(parse_or(&lookup, "GENERATOR_TIMEOUT_SECS", 120)?),
            extraction_timeout: Duration::from_secs(parse_or(
                &lookup,
                "EXTRACTION_TIMEOUT_SECS",
                30,
            )?),
            poll_timeout_secs: parse_or(&lookup, "POLL_TIMEOUT_SECS", 30)?,
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            session_ttl: (session_ttl_secs > 0).then(|| Duration::from_secs(session_ttl_secs)),
            markdown_mode: if parse_or(&lookup, "MARKDOWN_AS_HTML", false)? {
                MarkdownMode::Html
            } else {
                MarkdownMode::PlainText
            },
        })
    }
}

fn require<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        None => Ok(default),
    }
}
