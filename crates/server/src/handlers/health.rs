//! Health endpoint: actor counters plus blob store usage.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{RenderMode, query_map, render_mode};
use crate::handlers::pages;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::{Html, IntoResponse, Json, Response};

/// GET /hc - counters and store usage. Each call bumps the persisted
/// monotonic health counter.
pub async fn health(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let query = query_map(&uri);
    let mode = render_mode(&headers, query.get("format").map(String::as_str));

    let snapshot = state.actor.hc().await?;
    state.schedule_deletes(snapshot.retired.clone());

    let entries = state
        .storage
        .list("obj/")
        .await
        .map_err(|e| ApiError::Internal(format!("store listing failed: {e}")))?;
    let store_objects = entries.len();
    let store_bytes: u64 = entries.iter().map(|e| e.size).sum();

    let body = serde_json::json!({
        "hcCount": snapshot.hc_count,
        "pendingTokens": snapshot.pending_tokens,
        "pendingBytes": snapshot.pending_bytes,
        "storeObjects": store_objects,
        "storeBytes": store_bytes,
    });

    Ok(match mode {
        RenderMode::Cli => Json(body).into_response(),
        RenderMode::Browser => Html(pages::health_page(&body)).into_response(),
    })
}
