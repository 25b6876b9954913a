//! Trojan-source guard.
//!
//! Documents containing Unicode bidirectional control characters are
//! rejected before parsing: reordered rendering can make a policy read as
//! the opposite of what it evaluates to. The guard also runs over raw bytes
//! by matching the UTF-8 encodings of the forbidden code points, so
//! detection happens before any decoding.

use crate::error::DocumentError;

/// The rejected code points: LRI, RLI, PDI, RLO.
pub const FORBIDDEN: [(char, &str); 4] = [
    ('\u{2066}', "U+2066 LEFT-TO-RIGHT ISOLATE"),
    ('\u{2067}', "U+2067 RIGHT-TO-LEFT ISOLATE"),
    ('\u{2069}', "U+2069 POP DIRECTIONAL ISOLATE"),
    ('\u{202E}', "U+202E RIGHT-TO-LEFT OVERRIDE"),
];

// Three-byte UTF-8 encodings of the forbidden code points.
const FORBIDDEN_UTF8: [[u8; 3]; 4] = [
    [0xE2, 0x81, 0xA6], // U+2066
    [0xE2, 0x81, 0xA7], // U+2067
    [0xE2, 0x81, 0xA9], // U+2069
    [0xE2, 0x80, 0xAE], // U+202E
];

/// Scan decoded source text. Returns the first forbidden character as a
/// trojan-source error with its line and column.
pub fn guard_source(document_name: &str, source: &str) -> Result<(), DocumentError> {
    let mut line: u32 = 1;
    let mut col: u32 = 1;
    for ch in source.chars() {
        if let Some((_, name)) = FORBIDDEN.iter().find(|(c, _)| *c == ch) {
            return Err(DocumentError::trojan_source(format!(
                "bidirectional control character {} in '{}' at line {}, column {}",
                name, document_name, line, col
            )));
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    Ok(())
}

/// Scan raw bytes for the UTF-8 encodings of the forbidden code points.
/// Returns the byte offset of the first match.
pub fn scan_bytes(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(3)
        .position(|w| FORBIDDEN_UTF8.iter().any(|enc| w == enc))
}

/// Byte-level variant of [`guard_source`], usable before decoding.
pub fn guard_bytes(document_name: &str, bytes: &[u8]) -> Result<(), DocumentError> {
    match scan_bytes(bytes) {
        Some(offset) => Err(DocumentError::trojan_source(format!(
            "bidirectional control character in '{}' at byte offset {}",
            document_name, offset
        ))),
        None => Ok(()),
    }
}
