//! Upload intake: multipart form, streamed PUT, and raw text.
//!
//! All three modes share the same spine: resolve a filename and declared
//! size, gate the size, `reserve` with the actor, write the blob, then
//! schedule `commit` without blocking the response. A failed blob write
//! schedules `abort` so the reservation never turns into a live token.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    RenderMode, download_url, filename_from_disposition, query_map, render_mode, unix_now,
};
use crate::handlers::pages;
use crate::metrics::{UPLOAD_BYTES_TOTAL, UPLOADS_TOTAL};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::Multipart;
use bytes::Bytes;
use deaddrop_state::{ReserveGrant, ReserveRequest};
use deaddrop_storage::ObjectAttrs;
use futures::StreamExt;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashMap;

/// Everything the upload spine needs besides the body.
struct UploadContext {
    query: HashMap<String, String>,
    headers: HeaderMap,
    ip: String,
    mode: RenderMode,
}

impl UploadContext {
    fn split(state: &AppState, req: Request) -> (Self, Body) {
        let (parts, body) = req.into_parts();
        let query = query_map(&parts.uri);
        let ip = crate::clientip::client_ip(&parts, state.trusted_proxies.as_ref());
        let mode = render_mode(&parts.headers, query.get("format").map(String::as_str));
        (
            Self {
                query,
                headers: parts.headers,
                ip,
                mode,
            },
            body,
        )
    }

    /// API key in priority order: query, header, multipart form field.
    fn api_key(&self, form_key: Option<String>) -> Option<String> {
        self.query
            .get("key")
            .cloned()
            .or_else(|| {
                self.headers
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .or(form_key)
    }
}

/// POST /ud - multipart form upload or raw text body.
pub async fn upload_post(State(state): State<AppState>, req: Request) -> Response {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let (ctx, body) = UploadContext::split(&state, req);

    let result = if content_type.starts_with("multipart/form-data") {
        upload_multipart(&state, &ctx, &content_type, body).await
    } else {
        upload_raw_text(&state, &ctx, body).await
    };
    respond(&state, &ctx, result)
}

/// PUT /ud - streamed upload, filename from query/headers.
pub async fn upload_put(State(state): State<AppState>, req: Request) -> Response {
    let (ctx, body) = UploadContext::split(&state, req);
    let result = upload_streamed(&state, &ctx, None, body).await;
    respond(&state, &ctx, result)
}

/// PUT /ud/{name} - streamed upload with the name in the path.
pub async fn upload_put_named(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Request,
) -> Response {
    let (ctx, body) = UploadContext::split(&state, req);
    let result = upload_streamed(&state, &ctx, Some(name), body).await;
    respond(&state, &ctx, result)
}

async fn upload_multipart(
    state: &AppState,
    ctx: &UploadContext,
    content_type: &str,
    body: Body,
) -> ApiResult<String> {
    // Rebuild a request so the multipart extractor can take over the body.
    let req = Request::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;

    let mut file: Option<(String, String, Bytes)> = None;
    let mut form_key: Option<String> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or("") {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let content_type = field
                    .content_type()
                    .map(|ct| ct.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?;
                file = Some((filename, content_type, data));
            }
            "key" => {
                if let Ok(text) = field.text().await {
                    form_key = Some(text);
                }
            }
            _ => {}
        }
    }

    let (raw_name, content_type, data) =
        file.ok_or_else(|| ApiError::BadRequest("no file provided".to_string()))?;
    if data.len() as u64 > state.config.max_bytes() {
        return Err(ApiError::PayloadTooLarge);
    }

    store_buffered(state, ctx, &raw_name, &content_type, data, form_key).await
}

async fn upload_raw_text(state: &AppState, ctx: &UploadContext, body: Body) -> ApiResult<String> {
    let limit = state.config.max_bytes() as usize;
    let data = axum::body::to_bytes(body, limit.saturating_add(1))
        .await
        .map_err(|_| ApiError::PayloadTooLarge)?;
    if data.len() > limit {
        return Err(ApiError::PayloadTooLarge);
    }

    let name = format!("{}.txt", unix_now());
    store_buffered(
        state,
        ctx,
        &name,
        "text/plain; charset=utf-8",
        data,
        None,
    )
    .await
}

/// Reserve, write a fully-buffered blob, schedule commit.
async fn store_buffered(
    state: &AppState,
    ctx: &UploadContext,
    raw_name: &str,
    content_type: &str,
    data: Bytes,
    form_key: Option<String>,
) -> ApiResult<String> {
    let grant = reserve(state, ctx, raw_name, data.len() as u64, content_type, form_key).await?;

    let attrs = ObjectAttrs {
        filename: grant.filename.clone(),
        uploaded_at: unix_now().to_string(),
    };
    let size = data.len() as u64;
    if let Err(e) = state.storage.put(&grant.object_key, data, &attrs).await {
        spawn_abort(state.clone(), grant.token.clone());
        return Err(ApiError::Storage(e));
    }

    finish_upload(state, ctx, grant, size)
}

/// Reserve, stream the request body into the store, schedule commit.
async fn upload_streamed(
    state: &AppState,
    ctx: &UploadContext,
    path_name: Option<String>,
    body: Body,
) -> ApiResult<String> {
    let declared = ctx
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or(ApiError::LengthRequired)?;
    if declared > state.config.max_bytes() {
        return Err(ApiError::PayloadTooLarge);
    }

    let raw_name = resolve_put_filename(ctx, path_name);
    let content_type = ctx
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let grant = reserve(state, ctx, &raw_name, declared, &content_type, None).await?;

    let attrs = ObjectAttrs {
        filename: grant.filename.clone(),
        uploaded_at: unix_now().to_string(),
    };
    let mut upload = match state.storage.put_stream(&grant.object_key, &attrs).await {
        Ok(upload) => upload,
        Err(e) => {
            spawn_abort(state.clone(), grant.token.clone());
            return Err(ApiError::Storage(e));
        }
    };

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if let Err(e) = upload.write(bytes).await {
                    let _ = upload.abort().await;
                    spawn_abort(state.clone(), grant.token.clone());
                    return Err(ApiError::Storage(e));
                }
            }
            Err(e) => {
                let _ = upload.abort().await;
                spawn_abort(state.clone(), grant.token.clone());
                return Err(ApiError::BadRequest(format!("failed to read body: {e}")));
            }
        }
    }

    let written = match upload.finish().await {
        Ok(written) => written,
        Err(e) => {
            spawn_abort(state.clone(), grant.token.clone());
            return Err(ApiError::Storage(e));
        }
    };

    finish_upload(state, ctx, grant, written)
}

async fn reserve(
    state: &AppState,
    ctx: &UploadContext,
    raw_name: &str,
    size: u64,
    content_type: &str,
    form_key: Option<String>,
) -> ApiResult<ReserveGrant> {
    let grant = state
        .actor
        .reserve(ReserveRequest {
            ip: ctx.ip.clone(),
            api_key: ctx.api_key(form_key),
            filename: raw_name.to_string(),
            size,
            content_type: content_type.to_string(),
        })
        .await?;
    state.schedule_deletes(grant.retired.clone());
    Ok(grant)
}

fn finish_upload(
    state: &AppState,
    ctx: &UploadContext,
    grant: ReserveGrant,
    size: u64,
) -> ApiResult<String> {
    UPLOADS_TOTAL.inc();
    UPLOAD_BYTES_TOTAL.inc_by(size);
    tracing::info!(filename = %grant.filename, size, "upload stored");

    let url = download_url(&state.config, &ctx.headers, &grant.token, &grant.filename);
    spawn_commit(state.clone(), grant.token);
    Ok(url)
}

/// Filename for a streamed PUT, in documented priority order.
fn resolve_put_filename(ctx: &UploadContext, path_name: Option<String>) -> String {
    if let Some(name) = ctx.query.get("name").or_else(|| ctx.query.get("filename"))
        && !name.is_empty()
    {
        return name.clone();
    }
    for header_name in ["x-filename", "x-file-name"] {
        if let Some(value) = ctx.headers.get(header_name)
            && let Ok(name) = value.to_str()
            && !name.is_empty()
        {
            return name.to_string();
        }
    }
    if let Some(value) = ctx.headers.get(header::CONTENT_DISPOSITION)
        && let Ok(raw) = value.to_str()
        && let Some(name) = filename_from_disposition(raw)
    {
        return name;
    }
    if let Some(name) = path_name
        && !name.is_empty()
    {
        return name;
    }
    random_basename()
}

/// Fallback name for anonymous streamed uploads.
fn random_basename() -> String {
    let mut raw = [0u8; 8];
    OsRng.fill_bytes(&mut raw);
    let letters: String = raw.iter().map(|b| (b % 26 + b'a') as char).collect();
    format!("{letters}.bin")
}

/// Commit is scheduled off the response path; the uploader already has its
/// URL by the time the flip to `ready` lands.
fn spawn_commit(state: AppState, token: String) {
    tokio::spawn(async move {
        match state.actor.commit(&token).await {
            Ok(retired) => state.schedule_deletes(retired),
            Err(e) => tracing::warn!(token = %token, error = %e, "commit failed"),
        }
    });
}

fn spawn_abort(state: AppState, token: String) {
    tokio::spawn(async move {
        match state.actor.abort(&token).await {
            Ok(retired) => state.schedule_deletes(retired),
            Err(e) => tracing::warn!(token = %token, error = %e, "abort failed"),
        }
    });
}

/// Render an upload outcome for the requester: plain lines for CLI clients,
/// the form page for browsers. Opaque misses stay empty either way.
fn respond(state: &AppState, ctx: &UploadContext, result: ApiResult<String>) -> Response {
    match result {
        Ok(url) => match ctx.mode {
            RenderMode::Cli => (StatusCode::CREATED, format!("OK\n{url}\n")).into_response(),
            // Browsers get the form page back with the link rendered in.
            RenderMode::Browser => {
                (StatusCode::OK, Html(pages::upload_result_page(state, &url))).into_response()
            }
        },
        Err(ApiError::Opaque404) => ApiError::Opaque404.into_response(),
        Err(e) => match ctx.mode {
            RenderMode::Cli => e.into_response(),
            RenderMode::Browser => {
                let page = pages::upload_error_page(state, e.status_line().trim());
                (e.status_code(), Html(page)).into_response()
            }
        },
    }
}
