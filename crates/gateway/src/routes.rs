//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use tower_http::trace::TraceLayer;

/// Body limit: the 20 MB media ceiling plus multipart framing slack.
const MAX_BODY_BYTES: usize = 21 * 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::dispatch_message))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
