//! Upstream envelope construction.
//!
//! Everything the upstream webhook receives has the shape
//! `{msgtype: <kind>, <kind>: {...}}`. Image payloads always carry a correct
//! MD5: a missing digest is computed over the decoded bytes before dispatch.

use crate::error::{ApiError, ApiResult};
use crate::message::{Article, Message};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

/// Build the send envelope for a message.
///
/// `FileUpload` descriptors must go through the two-step dispatch first;
/// handing one in here is a programming error surfaced as 500.
pub fn build(message: &Message) -> ApiResult<Value> {
    match message {
        Message::Text {
            content,
            mentioned_list,
            mentioned_mobile_list,
        } => Ok(json!({
            "msgtype": "text",
            "text": {
                "content": content,
                "mentioned_list": mentioned_list,
                "mentioned_mobile_list": mentioned_mobile_list,
            },
        })),
        Message::Markdown { content } => Ok(json!({
            "msgtype": "markdown",
            "markdown": { "content": content },
        })),
        Message::Image { base64, md5 } => {
            let digest = match md5 {
                Some(given) => given.clone(),
                None => {
                    let decoded = STANDARD.decode(base64).map_err(|e| {
                        ApiError::BadRequest(format!("invalid base64 image data: {e}"))
                    })?;
                    hex_md5(&decoded)
                }
            };
            Ok(json!({
                "msgtype": "image",
                "image": { "base64": base64, "md5": digest },
            }))
        }
        Message::News { articles } => Ok(json!({
            "msgtype": "news",
            "news": { "articles": articles.iter().map(article_json).collect::<Vec<_>>() },
        })),
        Message::FileRef { media_id } => Ok(json!({
            "msgtype": "file",
            "file": { "media_id": media_id },
        })),
        Message::FileUpload { data, as_image, .. } => {
            if !as_image {
                return Err(ApiError::Internal(
                    "file upload must be dispatched through the upload leg".to_string(),
                ));
            }
            // Image channel: the gateway does the base64+md5 conversion.
            Ok(json!({
                "msgtype": "image",
                "image": {
                    "base64": STANDARD.encode(data),
                    "md5": hex_md5(data),
                },
            }))
        }
        Message::TemplateCard { card } => Ok(json!({
            "msgtype": "template_card",
            "template_card": card,
        })),
    }
}

fn article_json(a: &Article) -> Value {
    let mut out = json!({ "title": a.title, "url": a.url });
    if let Some(description) = &a.description {
        out["description"] = json!(description);
    }
    if let Some(picurl) = &a.picurl {
        out["picurl"] = json!(picurl);
    }
    out
}

/// Lowercase hex MD5 digest.
pub fn hex_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
