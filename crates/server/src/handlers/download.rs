//! One-shot download handling.
//!
//! The claim is persisted before the first byte is streamed, so a crash
//! mid-stream can never leave a token reusable. Cleanup (blob delete +
//! finalize) fires when the body completes or the client disconnects,
//! whichever comes first.

use crate::error::ApiError;
use crate::metrics::DOWNLOADS_TOTAL;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use deaddrop_core::{disposition, filename, token};
use deaddrop_storage::{ByteStream, StorageResult};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// GET /ud/f/{token}/{filename} - stream the blob once, then destroy it.
pub async fn download(
    State(state): State<AppState>,
    Path((token_param, filename_param)): Path<(String, String)>,
) -> Response {
    // Fast-path rejection of paths that could never name a live token.
    if !token::is_well_formed(&token_param) {
        return ApiError::Opaque404.into_response();
    }
    let Some(name) = filename::sanitize(&filename_param) else {
        return ApiError::Opaque404.into_response();
    };

    let grant = match state.actor.claim(&token_param, &name).await {
        Ok(grant) => grant,
        Err(_) => return ApiError::Opaque404.into_response(),
    };
    state.schedule_deletes(grant.retired.clone());

    let cleanup = DownloadCleanup {
        state: state.clone(),
        token: token_param,
        object_key: grant.object_key.clone(),
    };

    let stream = match state.storage.get_stream(&grant.object_key).await {
        Ok(stream) => stream,
        Err(e) => {
            // Claimed but the blob is gone; burn the token and stay opaque.
            tracing::warn!(object_key = %grant.object_key, error = %e, "claimed object missing");
            cleanup.fire();
            return ApiError::Opaque404.into_response();
        }
    };

    DOWNLOADS_TOTAL.inc();

    let body = Body::from_stream(FinalizeOnEnd {
        inner: stream,
        cleanup: Some(cleanup),
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, grant.content_type)
        .header(header::CONTENT_DISPOSITION, disposition::attachment(&name))
        .header(
            header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate, max-age=0",
        )
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .body(body)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to build download response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Post-download cleanup: delete the blob, then drop the token record.
struct DownloadCleanup {
    state: AppState,
    token: String,
    object_key: String,
}

impl DownloadCleanup {
    fn fire(self) {
        tokio::spawn(async move {
            match self.state.storage.delete(&self.object_key).await {
                Ok(()) => crate::metrics::OBJECTS_DELETED.inc(),
                Err(deaddrop_storage::StorageError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(key = %self.object_key, error = %e, "post-download delete failed");
                }
            }
            match self.state.actor.finalize(&self.token).await {
                Ok(retired) => self.state.schedule_deletes(retired),
                Err(e) => {
                    tracing::warn!(token = %self.token, error = %e, "finalize failed");
                }
            }
        });
    }
}

/// Byte stream that triggers cleanup exactly once: on normal completion or,
/// via `Drop`, when the client disconnects mid-stream.
struct FinalizeOnEnd {
    inner: ByteStream,
    cleanup: Option<DownloadCleanup>,
}

impl FinalizeOnEnd {
    fn trigger(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.fire();
        }
    }
}

impl Stream for FinalizeOnEnd {
    type Item = StorageResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.trigger();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for FinalizeOnEnd {
    fn drop(&mut self) {
        self.trigger();
    }
}
