//! PDF text extraction.
//!
//! Pages are read in order with `lopdf` and joined with a single space. A page
//! whose text cannot be decoded contributes an empty string. If no page yields
//! anything, the whole file gets a second pass through `pdf-extract`, which
//! copes with more font encodings at the cost of losing page boundaries.

use std::path::Path;

use lopdf::Document;
use tracing::{debug, warn};

use super::{DocumentFormat, ExtractError};

pub fn extract_pages(path: &Path) -> Result<String, ExtractError> {
    extract_pages_with(path, |path| {
        pdf_extract::extract_text(path).map_err(|e| e.to_string())
    })
}

fn extract_pages_with<F>(path: &Path, fallback: F) -> Result<String, ExtractError>
where
    F: FnOnce(&Path) -> Result<String, String>,
{
    let document = Document::load(path).map_err(|e| ExtractError::Malformed {
        format: DocumentFormat::Pdf,
        detail: e.to_string(),
    })?;

    let pages: Vec<String> = document
        .get_pages()
        .keys()
        .map(|&page_number| match document.extract_text(&[page_number]) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                debug!("PDF page {page_number} has no extractable text: {e}");
                String::new()
            }
        })
        .collect();

    if pages.iter().any(|page| !page.is_empty()) {
        return Ok(pages.join(" "));
    }

    warn!(
        "lopdf found no text on {} page(s); retrying with pdf-extract",
        pages.len()
    );
    match fallback(path) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) => {
            warn!("pdf-extract fallback failed: {e}");
            Ok(String::new())
        }
    }
}
