//! Artifact Renderer: rewritten plain text in, paginated PDF bytes out.
//!
//! The PDF is assembled directly with `lopdf` using the built-in Courier font,
//! one `BT … ET` block per line so text extractors see line boundaries.
//! Rendering is CPU-bound; async callers run it inside `spawn_blocking`.

pub mod encoding;
pub mod layout;

use bytes::Bytes;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use thiserror::Error;
use tracing::debug;

pub use layout::PageConfig;

pub const ARTIFACT_FILE_NAME: &str = "Optimized_Resume.pdf";
pub const ARTIFACT_CAPTION: &str =
    "✅ Your optimized ATS-ready resume, tailored to your job description 🎯";

const FONT_RESOURCE: &str = "F1";
const FONT_NAME: &str = "Courier";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("character {ch:?} on line {line} cannot be drawn with the document font")]
    UnsupportedCharacter { ch: char, line: usize },

    #[error("nothing to render")]
    EmptyText,

    #[error("PDF assembly failed: {0}")]
    Pdf(String),
}

/// A finished downloadable document.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub file_name: String,
    pub caption: String,
}

/// Renders `text` into a paginated PDF. Each input line becomes one or more
/// wrapped lines, in order.
pub fn render_artifact(text: &str, config: &PageConfig) -> Result<Artifact, RenderError> {
    if text.trim().is_empty() {
        return Err(RenderError::EmptyText);
    }
    check_encodable(text)?;

    let pages = layout::paginate(text, config);
    let bytes = build_pdf(&pages, config)?;
    debug!("Rendered {} page(s), {} bytes", pages.len(), bytes.len());

    Ok(Artifact {
        bytes: Bytes::from(bytes),
        file_name: ARTIFACT_FILE_NAME.to_string(),
        caption: ARTIFACT_CAPTION.to_string(),
    })
}

/// Fails on the first character the font cannot draw, reporting its 1-based line.
fn check_encodable(text: &str) -> Result<(), RenderError> {
    for (index, line) in text.lines().enumerate() {
        let cleaned = line.replace(['\t', '\r'], " ");
        encoding::encode_line(&cleaned)
            .map_err(|ch| RenderError::UnsupportedCharacter { ch, line: index + 1 })?;
    }
    Ok(())
}

fn build_pdf(pages: &[Vec<String>], config: &PageConfig) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => FONT_NAME,
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { FONT_RESOURCE => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for lines in pages {
        let page_id = add_page(&mut doc, pages_id, resources_id, lines, config)?;
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    let media_box: Vec<Object> = vec![
        0.into(),
        0.into(),
        points(config.page_width_pt).into(),
        points(config.page_height_pt).into(),
    ];
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => media_box,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| RenderError::Pdf(e.to_string()))?;
    Ok(buffer)
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    lines: &[String],
    config: &PageConfig,
) -> Result<ObjectId, RenderError> {
    let x = points(config.margin_left_pt);
    let font_size = points(config.font_size_pt);
    let mut operations = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        let encoded = encoding::encode_line(line).map_err(|ch| RenderError::UnsupportedCharacter {
            ch,
            line: index + 1,
        })?;
        let y = points(config.first_baseline_pt() - config.leading_pt * index as f32);

        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![FONT_RESOURCE.into(), font_size.into()],
        ));
        operations.push(Operation::new("Td", vec![x.into(), y.into()]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(encoded, StringFormat::Literal)],
        ));
        operations.push(Operation::new("ET", vec![]));
    }

    let content = Content { operations }
        .encode()
        .map_err(|e| RenderError::Pdf(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    }))
}

/// PDF user-space coordinates, rounded to whole points.
fn points(value: f32) -> i64 {
    value.round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_metadata_and_pdf_header() {
        let artifact = render_artifact("Jane Doe\nSenior Rust Engineer", &PageConfig::default()).unwrap();
        assert_eq!(artifact.file_name, "Optimized_Resume.pdf");
        assert!(!artifact.caption.is_empty());
        assert!(artifact.bytes.starts_with(b"%PDF-1.5"));
    }

    #[test]
    fn test_rendered_text_is_extractable_in_order() {
        let artifact = render_artifact(
            "Jane Doe\n\nSUMMARY\nBackend engineer (Go, Rust) — led 3 migrations.",
            &PageConfig::default(),
        )
        .unwrap();

        let doc = Document::load_mem(&artifact.bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let text = doc.extract_text(&[1]).unwrap();
        let name = text.find("Jane Doe").unwrap();
        let summary = text.find("SUMMARY").unwrap();
        assert!(name < summary);
        assert!(text.contains("(Go, Rust)"));
    }

    #[test]
    fn test_long_text_paginates() {
        let config = PageConfig::default();
        let text = (0..config.lines_per_page() * 2 + 1)
            .map(|i| format!("Achievement {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let artifact = render_artifact(&text, &config).unwrap();
        let doc = Document::load_mem(&artifact.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_unsupported_character_fails_instead_of_corrupting() {
        let result = render_artifact("Jane Doe\nShipped fast 🚀", &PageConfig::default());
        match result {
            Err(RenderError::UnsupportedCharacter { ch, line }) => {
                assert_eq!(ch, '🚀');
                assert_eq!(line, 2);
            }
            other => panic!("expected UnsupportedCharacter, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_text_is_rejected() {
        assert!(matches!(
            render_artifact("  \n ", &PageConfig::default()),
            Err(RenderError::EmptyText)
        ));
    }
}
