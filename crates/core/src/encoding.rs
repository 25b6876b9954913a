//! Byte-order-mark sniffing and decoding of policy document sources.
//!
//! Policy sources may arrive as UTF-8, UTF-16 (LE/BE), or UTF-32 (LE/BE)
//! with a BOM; without one they default to UTF-8. Everything is converted to
//! a Rust `String` (UTF-8) before parsing, and the BOM itself is stripped.

use crate::error::DocumentError;

/// Detected source encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
}

/// Sniff the BOM. Returns the encoding and the BOM length in bytes.
///
/// UTF-32 LE must be checked before UTF-16 LE: `FF FE 00 00` is a valid
/// UTF-16 LE BOM followed by a NUL otherwise.
pub fn detect_encoding(bytes: &[u8]) -> (Encoding, usize) {
    if bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        (Encoding::Utf32Be, 4)
    } else if bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
        (Encoding::Utf32Le, 4)
    } else if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        (Encoding::Utf8, 3)
    } else if bytes.starts_with(&[0xFE, 0xFF]) {
        (Encoding::Utf16Be, 2)
    } else if bytes.starts_with(&[0xFF, 0xFE]) {
        (Encoding::Utf16Le, 2)
    } else {
        (Encoding::Utf8, 0)
    }
}

/// Decode raw document bytes to a string, honoring any BOM.
pub fn decode_source(bytes: &[u8]) -> Result<String, DocumentError> {
    let (encoding, bom_len) = detect_encoding(bytes);
    let body = &bytes[bom_len..];
    match encoding {
        Encoding::Utf8 => std::str::from_utf8(body)
            .map(str::to_owned)
            .map_err(|e| DocumentError::syntax(format!("invalid UTF-8 at byte {}", e.valid_up_to()))),
        Encoding::Utf16Le => decode_utf16(body, u16::from_le_bytes),
        Encoding::Utf16Be => decode_utf16(body, u16::from_be_bytes),
        Encoding::Utf32Le => decode_utf32(body, u32::from_le_bytes),
        Encoding::Utf32Be => decode_utf32(body, u32::from_be_bytes),
    }
}

fn decode_utf16(body: &[u8], read: fn([u8; 2]) -> u16) -> Result<String, DocumentError> {
    if body.len() % 2 != 0 {
        return Err(DocumentError::syntax(
            "UTF-16 source has an odd number of bytes",
        ));
    }
    let units: Vec<u16> = body.chunks_exact(2).map(|c| read([c[0], c[1]])).collect();
    char::decode_utf16(units.into_iter())
        .collect::<Result<String, _>>()
        .map_err(|e| DocumentError::syntax(format!("invalid UTF-16: {}", e)))
}

fn decode_utf32(body: &[u8], read: fn([u8; 4]) -> u32) -> Result<String, DocumentError> {
    if body.len() % 4 != 0 {
        return Err(DocumentError::syntax(
            "UTF-32 source length is not a multiple of four bytes",
        ));
    }
    body.chunks_exact(4)
        .map(|c| {
            let unit = read([c[0], c[1], c[2], c[3]]);
            char::from_u32(unit)
                .ok_or_else(|| DocumentError::syntax(format!("invalid UTF-32 code point {:#X}", unit)))
        })
        .collect()
}
