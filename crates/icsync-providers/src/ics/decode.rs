//! Character decoding of fetched calendar bytes.

use std::borrow::Cow;

use tracing::warn;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Code points of Windows-1252 bytes 0x80..=0x9F. Undefined slots map to
/// the C1 control with the same value, as Latin-1 would.
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
    '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}',
    '\u{017D}', '\u{008F}', '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
    '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
    '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Decodes `bytes` using the declared charset, falling back to UTF-8.
///
/// A leading UTF-8 byte order mark is dropped. Invalid UTF-8 sequences are
/// replaced rather than rejected.
pub fn decode(bytes: &[u8], charset: Option<&str>) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let charset = charset.map(|c| c.trim().to_ascii_lowercase());

    match charset.as_deref() {
        None | Some("utf-8" | "utf8" | "us-ascii" | "ascii") => utf8_lossy(bytes),
        Some("iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1") => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        Some("windows-1252" | "cp1252") => bytes.iter().map(|&b| windows_1252(b)).collect(),
        Some(other) => {
            warn!(charset = other, "Unsupported charset, decoding as UTF-8");
            utf8_lossy(bytes)
        }
    }
}

fn utf8_lossy(bytes: &[u8]) -> String {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => {
            warn!("Calendar contains invalid UTF-8, replaced offending bytes");
            text
        }
    }
}

fn windows_1252(byte: u8) -> char {
    match byte {
        0x80..=0x9F => WINDOWS_1252_HIGH[usize::from(byte - 0x80)],
        _ => char::from(byte),
    }
}
