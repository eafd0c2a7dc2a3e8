//! Prometheus metrics for the relay server.
//!
//! The `/metrics` endpoint is only mounted when `server.metrics_enabled` is
//! set; the default surface stays limited to the relay routes. When enabled,
//! restrict the endpoint to your scraper at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Registry for all relay metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static UPLOADS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("deaddrop_uploads_total", "Blobs accepted for relay")
        .expect("metric creation failed")
});

pub static UPLOAD_BYTES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("deaddrop_upload_bytes_total", "Bytes accepted for relay")
        .expect("metric creation failed")
});

pub static DOWNLOADS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("deaddrop_downloads_total", "One-shot downloads served")
        .expect("metric creation failed")
});

pub static OBJECTS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "deaddrop_objects_deleted_total",
        "Blobs deleted after download, eviction or expiry",
    )
    .expect("metric creation failed")
});

/// Register all metrics with the registry. Idempotent.
pub fn register_metrics() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS_TOTAL.clone()))
            .expect("register uploads_total");
        REGISTRY
            .register(Box::new(UPLOAD_BYTES_TOTAL.clone()))
            .expect("register upload_bytes_total");
        REGISTRY
            .register(Box::new(DOWNLOADS_TOTAL.clone()))
            .expect("register downloads_total");
        REGISTRY
            .register(Box::new(OBJECTS_DELETED.clone()))
            .expect("register objects_deleted_total");
    });
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        tracing::error!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
    }
    (
        StatusCode::OK,
        [("Content-Type", prometheus::TEXT_FORMAT)],
        buf,
    )
        .into_response()
}
