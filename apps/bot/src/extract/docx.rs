//! DOCX paragraph extraction.
//!
//! A `.docx` is a zip archive; the body lives in `word/document.xml`. Each
//! top-level `<w:p>` element becomes one output line (empty paragraphs
//! included), built from its `<w:t>` runs plus `<w:tab/>` and `<w:br/>`
//! markers in document order. Paragraphs nested inside a paragraph (text
//! boxes) fold into the outer line.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use super::{DocumentFormat, ExtractError};

const DOCUMENT_PART: &str = "word/document.xml";

pub fn extract_paragraphs(path: &Path) -> Result<String, ExtractError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(malformed)?;
    let mut entry = archive.by_name(DOCUMENT_PART).map_err(malformed)?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| malformed(format!("{DOCUMENT_PART}: {e}")))?;

    Ok(paragraphs_from_xml(&xml)?.join("\n"))
}

fn paragraphs_from_xml(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(tag) => match tag.name().as_ref() {
                b"w:p" => depth += 1,
                b"w:t" => in_text = depth > 0,
                _ => {}
            },
            Event::End(tag) => match tag.name().as_ref() {
                b"w:p" => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                }
                b"w:t" => in_text = false,
                _ => {}
            },
            // `<w:t/>` carries no text; only paragraph-level markers matter here.
            Event::Empty(tag) => match tag.name().as_ref() {
                b"w:p" if depth == 0 => paragraphs.push(String::new()),
                b"w:tab" if depth > 0 => current.push('\t'),
                b"w:br" | b"w:cr" if depth > 0 => current.push('\n'),
                _ => {}
            },
            Event::Text(text) if in_text => {
                current.push_str(&text.unescape().map_err(malformed)?);
            }
            Event::CData(data) if in_text => {
                current.push_str(&String::from_utf8_lossy(&data));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn malformed(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Malformed {
        format: DocumentFormat::Docx,
        detail: e.to_string(),
    }
}
