//! `Content-Disposition` rendering and URL path-segment encoding.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Keep RFC 3986 unreserved characters verbatim; encode everything else.
/// Safe both for URL path segments and for RFC 5987 `filename*` values.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Maximum byte length of the plain-ASCII fallback filename.
const FALLBACK_MAX_BYTES: usize = 120;

/// Percent-encode a single URL path segment.
pub fn encode_segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

/// Reduce a filename to a quoted-string-safe ASCII fallback.
///
/// Non-ASCII, non-printable, `"` and `\` become `_`; the result is capped at
/// 120 bytes and falls back to `download` when nothing remains.
pub fn ascii_fallback(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(FALLBACK_MAX_BYTES));
    for c in name.chars() {
        if out.len() >= FALLBACK_MAX_BYTES {
            break;
        }
        let mapped = match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        };
        out.push(mapped);
    }
    let out = out.trim().to_string();
    if out.is_empty() { "download".to_string() } else { out }
}

/// Render the attachment `Content-Disposition` value for a download.
///
/// Carries both the ASCII fallback (`filename=`) and the RFC 5987 encoded
/// original (`filename*=`) so every client gets a usable name.
pub fn attachment(name: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback(name),
        encode_segment(name)
    )
}
