//! Help text and the HTML upload form.
//!
//! Rendering is the only thing the browser heuristic changes; the underlying
//! operations are identical for both audiences.

use crate::handlers::common::{RenderMode, query_map, render_mode, request_origin};
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::{Html, IntoResponse, Response};

/// GET /hp - usage help.
pub async fn help_page(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let query = query_map(&uri);
    let mode = render_mode(&headers, query.get("format").map(String::as_str));
    let origin = request_origin(&state.config, &headers);
    match mode {
        RenderMode::Cli => help_text(&state, &origin).into_response(),
        RenderMode::Browser => Html(help_html(&state, &origin)).into_response(),
    }
}

/// GET /ud - upload form for browsers, help text for everyone else.
pub async fn upload_page(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let query = query_map(&uri);
    let mode = render_mode(&headers, query.get("format").map(String::as_str));
    let origin = request_origin(&state.config, &headers);
    match mode {
        RenderMode::Cli => help_text(&state, &origin).into_response(),
        RenderMode::Browser => Html(form_page(&state, None, None)).into_response(),
    }
}

fn help_text(state: &AppState, origin: &str) -> String {
    let base = &state.config.base_path;
    format!(
        "deaddrop - one-shot file relay\n\
         \n\
         Upload a file (returns a single-use download URL):\n\
         \n\
         \tcurl -T file.bin {origin}{base}/ud\n\
         \tcurl -T notes.txt \"{origin}{base}/ud?name=notes.txt\"\n\
         \tcurl -F file=@photo.jpg {origin}{base}/ud\n\
         \tcurl --data-binary @- {origin}{base}/ud < notes.txt\n\
         \n\
         The first GET of the returned URL streams the file back and\n\
         destroys it. A second GET finds nothing.\n\
         \n\
         Limits: {max_mb} MiB per file, one upload per {rate}s per address.\n",
        max_mb = state.config.max_mb,
        rate = state.config.rate_limit_sec.max(0),
    )
}

fn help_html(state: &AppState, origin: &str) -> String {
    let base = &state.config.base_path;
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>deaddrop</title></head>\
         <body><h1>deaddrop</h1>\
         <p>One-shot file relay: upload a file, share the URL, the first\
         download destroys it.</p>\
         <pre>curl -T file.bin {origin}{base}/ud</pre>\
         <p><a href=\"{base}/ud\">Upload form</a></p></body></html>"
    )
}

fn form_page(state: &AppState, link: Option<&str>, error: Option<&str>) -> String {
    let base = &state.config.base_path;
    let notice = match (link, error) {
        (Some(url), _) => format!(
            "<p>Uploaded. Single-use link:</p><p><a href=\"{url}\">{url}</a></p>"
        ),
        (None, Some(msg)) => format!("<p class=\"error\">{}</p>", escape_html(msg)),
        (None, None) => String::new(),
    };
    let key_field = if state.config.api_key.is_some() {
        "<p><input type=\"password\" name=\"key\" placeholder=\"API key\"></p>"
    } else {
        ""
    };
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>deaddrop</title>\
         <style>body{{font-family:sans-serif;max-width:40em;margin:2em auto}}\
         .error{{color:#b00}}</style></head><body>\
         <h1>deaddrop</h1>{notice}\
         <form method=\"post\" action=\"{base}/ud\" enctype=\"multipart/form-data\">\
         <p><input type=\"file\" name=\"file\" required></p>{key_field}\
         <p><button type=\"submit\">Upload</button></p></form>\
         <p>Files vanish after one download (limit {max_mb} MiB).</p>\
         </body></html>",
        max_mb = state.config.max_mb,
    )
}

/// Form page with the fresh download link rendered in.
pub fn upload_result_page(state: &AppState, url: &str) -> String {
    form_page(state, Some(url), None)
}

/// Form page with an error banner.
pub fn upload_error_page(state: &AppState, message: &str) -> String {
    form_page(state, None, Some(message))
}

/// Minimal HTML wrapper around the health JSON.
pub fn health_page(body: &serde_json::Value) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>deaddrop health</title>\
         </head><body><h1>Health</h1><pre>{}</pre></body></html>",
        escape_html(&serde_json::to_string_pretty(body).unwrap_or_default())
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escaping_covers_the_basics() {
        assert_eq!(escape_html("<a href=\"x\">&"), "&lt;a href=&quot;x&quot;&gt;&amp;");
    }
}
