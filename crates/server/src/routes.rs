//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Anything outside the relay surface, including wrong methods on known
/// paths, answers with a body-less 404.
pub fn create_router(state: AppState) -> Router {
    let relay = Router::new()
        .route("/hc", get(handlers::health))
        .route("/hp", get(handlers::help_page))
        .route(
            "/ud",
            get(handlers::upload_page)
                .post(handlers::upload_post)
                .put(handlers::upload_put),
        )
        .route("/ud/{name}", put(handlers::upload_put_named))
        .route("/ud/f/{token}/{filename}", get(handlers::download));

    let base = state.config.base_path.clone();
    let mut router = if base.is_empty() {
        relay
    } else {
        Router::new().nest(&base, relay)
    };

    // Off by default; when on, network-restrict this endpoint to the scraper.
    if state.config.server.metrics_enabled {
        router = router.merge(Router::new().route("/metrics", get(metrics_handler)));
    }

    // Allow a little slack over the declared ceiling so the handler, not the
    // body limiter, produces the 413.
    let body_limit = state.config.max_bytes() as usize + 64 * 1024;

    router
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
