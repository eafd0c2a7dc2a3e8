//! Request normalization and dispatch orchestration.

use crate::dispatch::UpstreamReply;
use crate::envelope;
use crate::error::{ApiError, ApiResult};
use crate::message::Message;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{FromRequest, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::Multipart;
use bytes::Bytes;
use deaddrop_core::query;
use serde::Serialize;
use std::collections::HashMap;

/// Single-step dispatch result.
#[derive(Debug, Serialize)]
struct SendResult {
    ok: bool,
    upstream_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    errcode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errmsg: Option<String>,
}

impl SendResult {
    fn from_reply(reply: &UpstreamReply) -> Self {
        Self {
            ok: reply.ok(),
            upstream_status: reply.status,
            errcode: reply.errcode,
            errmsg: reply.errmsg.clone(),
        }
    }
}

/// Two-step (upload + send) dispatch result. The top-level fields mirror the
/// decisive leg: send when it ran, the failed upload otherwise.
#[derive(Debug, Serialize)]
struct FileSendResult {
    ok: bool,
    upstream_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    errcode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errmsg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_id: Option<String>,
    upload_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_errcode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_errmsg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    send_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    send_errcode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    send_errmsg: Option<String>,
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// POST / - accept a message in any of the three shapes and forward it.
pub async fn dispatch_message(State(state): State<AppState>, req: Request) -> Response {
    match dispatch_inner(state, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn dispatch_inner(state: AppState, req: Request) -> ApiResult<Response> {
    let q = query::parse(req.uri().query());
    let headers = req.headers().clone();

    check_access_token(&state, &headers, &q)?;

    let webhook_key = q
        .get("key")
        .cloned()
        .or_else(|| state.config.webhook_key.clone())
        .ok_or_else(|| ApiError::BadRequest("webhook key not configured".to_string()))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let message = if content_type.starts_with("application/json") {
        let payload: serde_json::Value = read_json(req.into_body()).await?;
        Message::from_json(&payload)?
    } else if content_type.starts_with("multipart/form-data") {
        normalize_multipart(req).await?
    } else {
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        let text = String::from_utf8_lossy(&body);
        Message::from_raw_text(&text, q.get("type").map(String::as_str))?
    };

    match message {
        Message::FileUpload {
            filename,
            content_type,
            data,
            as_image: false,
        } => dispatch_file(&state, &webhook_key, &filename, &content_type, &data).await,
        message => dispatch_single(&state, &webhook_key, &message).await,
    }
}

/// Allowlist check: bearer header or `token|access_token` query.
fn check_access_token(
    state: &AppState,
    headers: &HeaderMap,
    q: &HashMap<String, String>,
) -> ApiResult<()> {
    let allowlist = state.config.token_allowlist();
    if allowlist.is_empty() {
        return Ok(());
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let presented = bearer
        .map(str::to_string)
        .or_else(|| q.get("token").cloned())
        .or_else(|| q.get("access_token").cloned());

    match presented {
        Some(t) if allowlist.contains(&t.as_str()) => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

async fn read_json(body: Body) -> ApiResult<serde_json::Value> {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Multipart shape: a `file` field, plus `type=image` to pick the image
/// channel instead of the two-step file upload.
async fn normalize_multipart(req: Request) -> ApiResult<Message> {
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;

    let mut file: Option<(String, String, Bytes)> = None;
    let mut as_image = false;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or("") {
            "file" => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("file.bin")
                    .to_string();
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
            "type" => {
                if let Ok(text) = field.text().await {
                    as_image = text.trim() == "image";
                }
            }
            _ => {}
        }
    }

    let (filename, content_type, data) =
        file.ok_or_else(|| ApiError::BadRequest("no file provided".to_string()))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("empty file".to_string()));
    }

    Ok(Message::FileUpload {
        filename,
        content_type,
        data,
        as_image,
    })
}

async fn dispatch_single(
    state: &AppState,
    webhook_key: &str,
    message: &Message,
) -> ApiResult<Response> {
    let payload = envelope::build(message)?;
    let reply = state.dispatcher.send(webhook_key, &payload).await;
    let result = SendResult::from_reply(&reply);
    let status = if result.ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(result)).into_response())
}

async fn dispatch_file(
    state: &AppState,
    webhook_key: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> ApiResult<Response> {
    let upload = state
        .dispatcher
        .upload_media(webhook_key, filename, content_type, data)
        .await?;

    if !upload.reply.ok() || upload.media_id.is_none() {
        let result = FileSendResult {
            ok: false,
            upstream_status: upload.reply.status,
            errcode: upload.reply.errcode,
            errmsg: upload.reply.errmsg.clone(),
            media_id: upload.media_id,
            upload_status: upload.reply.status,
            upload_errcode: upload.reply.errcode,
            upload_errmsg: upload.reply.errmsg,
            send_status: None,
            send_errcode: None,
            send_errmsg: None,
        };
        return Ok((StatusCode::BAD_GATEWAY, Json(result)).into_response());
    }

    let media_id = upload.media_id.unwrap_or_default();
    let payload = envelope::build(&Message::FileRef {
        media_id: media_id.clone(),
    })?;
    let send = state.dispatcher.send(webhook_key, &payload).await;

    let ok = send.ok();
    let result = FileSendResult {
        ok,
        upstream_status: send.status,
        errcode: send.errcode,
        errmsg: send.errmsg.clone(),
        media_id: Some(media_id),
        upload_status: upload.reply.status,
        upload_errcode: upload.reply.errcode,
        upload_errmsg: upload.reply.errmsg,
        send_status: Some(send.status),
        send_errcode: send.errcode,
        send_errmsg: send.errmsg,
    };
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(result)).into_response())
}
