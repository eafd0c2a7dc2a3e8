//! Shared handler helpers: query parsing, the browser heuristic, and
//! download URL construction.

use axum::http::{HeaderMap, Uri, header};
use deaddrop_core::config::RelayConfig;
use deaddrop_core::{disposition, query};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// How to render a response body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Browser,
    Cli,
}

/// Parse the query string into a map. The first occurrence of a key wins.
pub fn query_map(uri: &Uri) -> HashMap<String, String> {
    query::parse(uri.query())
}

/// Decide between HTML and plain-text rendering.
///
/// An explicit `?format=` always wins; otherwise a request only counts as a
/// browser when both Accept and User-Agent look like one.
pub fn render_mode(headers: &HeaderMap, format: Option<&str>) -> RenderMode {
    match format {
        Some("html") => RenderMode::Browser,
        Some(_) => RenderMode::Cli,
        None => {
            let accepts_html = headers
                .get(header::ACCEPT)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.contains("text/html"));
            let mozilla = headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.contains("Mozilla"));
            if accepts_html && mozilla {
                RenderMode::Browser
            } else {
                RenderMode::Cli
            }
        }
    }
}

/// Origin for building absolute URLs: configuration wins, then the request.
pub fn request_origin(config: &RelayConfig, headers: &HeaderMap) -> String {
    if let Some(origin) = &config.server.public_origin {
        return origin.trim_end_matches('/').to_string();
    }
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{proto}://{host}")
}

/// Absolute one-shot download URL with both path segments percent-encoded.
pub fn download_url(config: &RelayConfig, headers: &HeaderMap, token: &str, name: &str) -> String {
    format!(
        "{}{}/ud/f/{}/{}",
        request_origin(config, headers),
        config.base_path,
        disposition::encode_segment(token),
        disposition::encode_segment(name),
    )
}

/// Filename from a request `Content-Disposition` header: RFC 5987
/// `filename*` first, then the plain quoted form.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename*=") {
            let mut it = rest.trim().splitn(3, '\'');
            let charset = it.next()?;
            let _lang = it.next()?;
            let encoded = it.next()?;
            if charset.eq_ignore_ascii_case("utf-8") {
                let decoded = percent_decode_str(encoded).decode_utf8_lossy().into_owned();
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        }
    }
    for part in value.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename=") {
            let rest = rest.trim().trim_matches('"');
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    None
}

/// Current time, epoch seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
