use pulldown_cmark::{html, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

/// How Markdown uploads are normalised before they reach the generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkdownMode {
    /// Strip markup and keep the readable text.
    #[default]
    PlainText,
    /// Render to HTML and keep the markup.
    Html,
}

pub fn render(source: &str, mode: MarkdownMode) -> String {
    match mode {
        MarkdownMode::PlainText => to_plain_text(source),
        MarkdownMode::Html => to_html(source),
    }
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

fn to_html(source: &str) -> String {
    let mut output = String::new();
    html::push_html(&mut output, Parser::new_ext(source, options()));
    output
}

fn to_plain_text(source: &str) -> String {
    let mut output = String::new();
    // Next item number per open list; `None` for bullet lists.
    let mut lists: Vec<Option<u64>> = Vec::new();

    for event in Parser::new_ext(source, options()) {
        match event {
            Event::Text(text) | Event::Code(text) => output.push_str(&text),
            Event::SoftBreak => output.push(' '),
            Event::HardBreak | Event::Rule => output.push('\n'),
            Event::TaskListMarker(done) => output.push_str(if done { "[x] " } else { "[ ] " }),
            Event::Start(Tag::List(start)) => lists.push(start),
            Event::End(TagEnd::List(_)) => {
                lists.pop();
            }
            Event::Start(Tag::Item) => {
                // Nested lists open inside their parent item's line.
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                match lists.last_mut() {
                    Some(Some(number)) => {
                        output.push_str(&format!("{number}. "));
                        *number += 1;
                    }
                    _ => output.push_str("- "),
                }
            }
            Event::End(TagEnd::TableCell) => output.push('\t'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::TableHead
                | TagEnd::TableRow,
            ) => {
                if !output.ends_with('\n') {
                    output.push('\n');
                }
            }
            _ => {}
        }
    }

    collapse_blank_lines(&output)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.is_empty() && lines.last().map_or(true, |prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
