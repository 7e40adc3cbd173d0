//! Page geometry and line wrapping for the rendered resume.
//!
//! The renderer only uses built-in Courier, so every glyph is 0.6 em wide and
//! a line's width is just its character count. Wrapping is greedy: words are
//! packed until the next one would overflow, and a word longer than a whole
//! line is hard-split.

use serde::{Deserialize, Serialize};

const MM_TO_PT: f32 = 72.0 / 25.4;

/// Courier advance width in em units.
const COURIER_CHAR_WIDTH_EM: f32 = 0.6;

const TAB_WIDTH: usize = 4;

/// Layout parameters for every rendered page, in PDF points.
///
/// Default: A4, 10 mm side and top margins, 15 mm bottom margin (the
/// auto-page-break threshold), Courier 12 pt on a 14 pt leading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageConfig {
    pub page_width_pt: f32,
    pub page_height_pt: f32,
    pub margin_left_pt: f32,
    pub margin_right_pt: f32,
    pub margin_top_pt: f32,
    pub margin_bottom_pt: f32,
    pub font_size_pt: f32,
    pub leading_pt: f32,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            page_width_pt: 595.28,
            page_height_pt: 841.89,
            margin_left_pt: 10.0 * MM_TO_PT,
            margin_right_pt: 10.0 * MM_TO_PT,
            margin_top_pt: 10.0 * MM_TO_PT,
            margin_bottom_pt: 15.0 * MM_TO_PT,
            font_size_pt: 12.0,
            leading_pt: 14.0,
        }
    }
}

impl PageConfig {
    pub fn text_width_pt(&self) -> f32 {
        self.page_width_pt - self.margin_left_pt - self.margin_right_pt
    }

    /// How many Courier characters fit on one line. Never less than one.
    pub fn chars_per_line(&self) -> usize {
        let char_width = self.font_size_pt * COURIER_CHAR_WIDTH_EM;
        ((self.text_width_pt() / char_width).floor() as usize).max(1)
    }

    /// How many lines fit between the top margin and the bottom break. Never less than one.
    pub fn lines_per_page(&self) -> usize {
        let usable = self.page_height_pt - self.margin_top_pt - self.margin_bottom_pt;
        ((usable / self.leading_pt).floor() as usize).max(1)
    }

    /// Baseline of the first line on a page, measured from the bottom edge.
    pub fn first_baseline_pt(&self) -> f32 {
        self.page_height_pt - self.margin_top_pt - self.font_size_pt
    }
}

/// Expands tabs, drops carriage returns, and wraps one logical input line.
///
/// Spacing is kept as typed, including leading indentation; whitespace that
/// lands on a wrap point is dropped. An empty input line yields a single empty
/// output line so paragraph gaps survive into the document.
pub fn wrap_line(line: &str, max_chars: usize) -> Vec<String> {
    let line = line.replace('\r', "").replace('\t', &" ".repeat(TAB_WIDTH));
    if line.trim().is_empty() {
        return vec![String::new()];
    }

    let max_chars = max_chars.max(1);
    let mut wrapped = Vec::new();
    let mut current: Vec<char> = Vec::new();

    for (is_space, token) in segments(&line) {
        let width = token.chars().count();

        if is_space {
            // Continuation lines never start with whitespace.
            if current.is_empty() && !wrapped.is_empty() {
                continue;
            }
            if current.len() + width > max_chars {
                flush(&mut current, &mut wrapped);
                continue;
            }
            current.extend(std::iter::repeat(' ').take(width));
            continue;
        }

        let mut word: Vec<char> = token.chars().collect();
        if !current.is_empty() && current.len() + word.len() > max_chars {
            flush(&mut current, &mut wrapped);
        }
        while word.len() > max_chars {
            flush(&mut current, &mut wrapped);
            let rest = word.split_off(max_chars);
            wrapped.push(word.into_iter().collect());
            word = rest;
        }
        current.extend(word);
    }

    flush(&mut current, &mut wrapped);
    wrapped
}

/// Splits a line into alternating runs of whitespace and non-whitespace.
fn segments(line: &str) -> Vec<(bool, &str)> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut previous: Option<bool> = None;

    for (index, ch) in line.char_indices() {
        let is_space = ch.is_whitespace();
        if let Some(was_space) = previous.filter(|&was_space| was_space != is_space) {
            runs.push((was_space, &line[start..index]));
            start = index;
        }
        previous = Some(is_space);
    }
    if let Some(was_space) = previous {
        runs.push((was_space, &line[start..]));
    }
    runs
}

/// Moves the pending line into `wrapped`, minus trailing spaces. A line of
/// nothing but spaces is discarded.
fn flush(current: &mut Vec<char>, wrapped: &mut Vec<String>) {
    let line: String = current.drain(..).collect();
    let line = line.trim_end();
    if !line.is_empty() {
        wrapped.push(line.to_string());
    }
}

/// Wraps every input line and splits the result into pages.
pub fn paginate(text: &str, config: &PageConfig) -> Vec<Vec<String>> {
    let max_chars = config.chars_per_line();
    let lines: Vec<String> = text
        .lines()
        .flat_map(|line| wrap_line(line, max_chars))
        .collect();

    if lines.is_empty() {
        return vec![Vec::new()];
    }
    lines
        .chunks(config.lines_per_page())
        .map(|chunk| chunk.to_vec())
        .collect()
}
