//! Text decoding with a fixed fallback chain: UTF-8, UTF-8 with BOM, Latin-1.

use std::borrow::Cow;

use encoding_rs::{UTF_8, WINDOWS_1252};
use serde::Serialize;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Encoding a payload was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Latin1,
}

/// Decode `bytes` into text, dropping a leading byte-order mark.
///
/// Latin-1 (as the WHATWG `windows-1252` superset) maps every byte, so the chain always ends
/// with a result.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, TextEncoding) {
    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        return match bytes.strip_prefix(UTF8_BOM) {
            Some(_) => {
                let stripped = match text {
                    Cow::Borrowed(s) => Cow::Borrowed(&s[UTF8_BOM.len()..]),
                    Cow::Owned(s) => Cow::Owned(s[UTF8_BOM.len()..].to_string()),
                };
                (stripped, TextEncoding::Utf8Bom)
            }
            None => (text, TextEncoding::Utf8),
        };
    }
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    (text, TextEncoding::Latin1)
}
