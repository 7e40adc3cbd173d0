//! WinAnsi (Windows-1252) encoding for the built-in PDF fonts.
//!
//! The standard 14 fonts only cover WinAnsi. Rather than letting unmappable
//! characters turn into garbage glyphs, `encode_line` rejects them so the
//! renderer can fail the attempt cleanly.

/// Characters that sit in the 0x80..=0x9F block of Windows-1252.
const CP1252_EXTRAS: &[(char, u8)] = &[
    ('€', 0x80),
    ('‚', 0x82),
    ('ƒ', 0x83),
    ('„', 0x84),
    ('…', 0x85),
    ('†', 0x86),
    ('‡', 0x87),
    ('ˆ', 0x88),
    ('‰', 0x89),
    ('Š', 0x8A),
    ('‹', 0x8B),
    ('Œ', 0x8C),
    ('Ž', 0x8E),
    ('‘', 0x91),
    ('’', 0x92),
    ('“', 0x93),
    ('”', 0x94),
    ('•', 0x95),
    ('–', 0x96),
    ('—', 0x97),
    ('˜', 0x98),
    ('™', 0x99),
    ('š', 0x9A),
    ('›', 0x9B),
    ('œ', 0x9C),
    ('ž', 0x9E),
    ('Ÿ', 0x9F),
];

/// Folds look-alike characters that commonly appear in generated text onto
/// ones the font can draw.
pub fn normalize_char(ch: char) -> char {
    match ch {
        '\u{2010}' | '\u{2011}' | '\u{2212}' => '-',
        '\u{2002}' | '\u{2003}' | '\u{2009}' | '\u{202F}' => ' ',
        '\u{25CF}' | '\u{25AA}' | '\u{2043}' => '•',
        other => other,
    }
}

pub fn encode_char(ch: char) -> Option<u8> {
    let ch = normalize_char(ch);
    match ch as u32 {
        0x20..=0x7E | 0xA0..=0xFF => Some(ch as u32 as u8),
        _ => CP1252_EXTRAS
            .iter()
            .find(|(candidate, _)| *candidate == ch)
            .map(|(_, byte)| *byte),
    }
}

/// Encodes one already-wrapped line, or returns the first character that
/// has no WinAnsi code point.
pub fn encode_line(line: &str) -> Result<Vec<u8>, char> {
    line.chars()
        .map(|ch| encode_char(ch).ok_or(ch))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_and_latin1_map_to_themselves() {
        assert_eq!(encode_line("Rust 2021").unwrap(), b"Rust 2021".to_vec());
        assert_eq!(encode_line("José").unwrap(), vec![b'J', b'o', b's', 0xE9]);
    }

    #[test]
    fn test_typographic_punctuation_is_supported() {
        assert_eq!(
            encode_line("• “Led” — 40%…").unwrap(),
            vec![0x95, b' ', 0x93, b'L', b'e', b'd', 0x94, b' ', 0x97, b' ', b'4', b'0', b'%', 0x85]
        );
    }

    #[test]
    fn test_lookalikes_are_folded() {
        assert_eq!(encode_line("a\u{2212}b").unwrap(), b"a-b".to_vec());
    }

    #[test]
    fn test_unmappable_character_is_reported() {
        assert_eq!(encode_line("Shipped 🚀 fast"), Err('🚀'));
        assert_eq!(encode_line("北京"), Err('北'));
    }
}
