//! Document Extractor: turns an uploaded file or a pasted message into text.
//!
//! The set of formats is closed. `DocumentFormat::from_file_name` is the only
//! place an extension is interpreted; everything downstream dispatches on the
//! enum through `DocumentFormat::extractor`.
//!
//! PDF and DOCX parsing works on a scoped `NamedTempFile`; the file is deleted
//! when the guard drops, whichever way extraction exits.

pub mod docx;
pub mod markdown;
pub mod pdf;

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

pub use markdown::MarkdownMode;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file format '{extension}'")]
    UnsupportedFormat { extension: String },

    #[error("file is {size} bytes, above the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("could not read {format} content: {detail}")]
    Malformed { format: DocumentFormat, detail: String },

    #[error("file is not valid UTF-8 text")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("temporary file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction exceeded {0:?}")]
    Timeout(Duration),
}

/// The four upload formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Markdown,
    Text,
}

/// Where an `ExtractedDocument` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Typed or pasted directly into the chat.
    Message,
    File(DocumentFormat),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    pub source: SourceFormat,
}

impl ExtractedDocument {
    pub fn from_message(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: SourceFormat::Message,
        }
    }
}

/// Options that shape extraction output without changing the format set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    pub markdown_mode: MarkdownMode,
}

type Extractor = fn(&[u8], &ExtractOptions) -> Result<String, ExtractError>;

impl DocumentFormat {
    /// Resolves the format from the declared filename, case-insensitively.
    pub fn from_file_name(file_name: &str) -> Result<Self, ExtractError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "md" => Ok(Self::Markdown),
            "txt" => Ok(Self::Text),
            _ => Err(ExtractError::UnsupportedFormat { extension }),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Markdown => "md",
            Self::Text => "txt",
        }
    }

    fn extractor(self) -> Extractor {
        match self {
            Self::Pdf => extract_pdf_bytes,
            Self::Docx => extract_docx_bytes,
            Self::Markdown => extract_markdown_bytes,
            Self::Text => extract_text_bytes,
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Synchronous extraction of one uploaded file. Callers on the async runtime
/// go through `extract_upload`, which moves this onto the blocking pool.
pub fn extract_file(
    file_name: &str,
    bytes: &[u8],
    options: &ExtractOptions,
) -> Result<ExtractedDocument, ExtractError> {
    let format = DocumentFormat::from_file_name(file_name)?;
    let text = (format.extractor())(bytes, options)?;
    Ok(ExtractedDocument {
        text,
        source: SourceFormat::File(format),
    })
}

/// Runs `extract_file` on the blocking pool, bounded by `timeout`.
///
/// On timeout the blocking task keeps running to completion in the
/// background; its temp file is still released when it finishes.
pub async fn extract_upload(
    file_name: String,
    bytes: Bytes,
    options: ExtractOptions,
    timeout: Duration,
) -> Result<ExtractedDocument, ExtractError> {
    let task = tokio::task::spawn_blocking(move || extract_file(&file_name, &bytes, &options));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ExtractError::Io(std::io::Error::other(format!(
            "extraction task failed: {join_err}"
        )))),
        Err(_) => Err(ExtractError::Timeout(timeout)),
    }
}

/// Writes the payload to a scoped temp file for the path-based parsers.
fn spill_to_temp(bytes: &[u8], format: DocumentFormat) -> Result<NamedTempFile, ExtractError> {
    let mut file = tempfile::Builder::new()
        .prefix("resume-bot-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

/// Hands `parse` a temp copy of `bytes`. The copy is removed when this
/// returns, whatever `parse` produced.
fn with_temp_copy<T>(
    bytes: &[u8],
    format: DocumentFormat,
    parse: impl FnOnce(&Path) -> Result<T, ExtractError>,
) -> Result<T, ExtractError> {
    let file = spill_to_temp(bytes, format)?;
    parse(file.path())
}

fn extract_pdf_bytes(bytes: &[u8], _options: &ExtractOptions) -> Result<String, ExtractError> {
    with_temp_copy(bytes, DocumentFormat::Pdf, pdf::extract_pages)
}

fn extract_docx_bytes(bytes: &[u8], _options: &ExtractOptions) -> Result<String, ExtractError> {
    with_temp_copy(bytes, DocumentFormat::Docx, docx::extract_paragraphs)
}

fn extract_markdown_bytes(bytes: &[u8], options: &ExtractOptions) -> Result<String, ExtractError> {
    let source = decode_utf8(bytes)?;
    Ok(markdown::render(&source, options.markdown_mode))
}

fn extract_text_bytes(bytes: &[u8], _options: &ExtractOptions) -> Result<String, ExtractError> {
    decode_utf8(bytes)
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = String::from_utf8(bytes.to_vec())?;
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}
