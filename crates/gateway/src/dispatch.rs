//! Upstream dispatcher: one-step send and the two-step upload+send.

use crate::error::{ApiError, ApiResult};
use deaddrop_core::config::GatewayConfig;
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::Value;
use std::time::Duration;

/// Upload leg size bounds: `5 B < size <= 20 MB`.
const MIN_MEDIA_BYTES: usize = 5;
const MAX_MEDIA_BYTES: usize = 20 * 1024 * 1024;

/// What one upstream call produced.
///
/// A transport failure is encoded as `status == 0` with the error text in
/// `errmsg`, so every outcome renders into the same structured result.
#[derive(Clone, Debug)]
pub struct UpstreamReply {
    pub status: u16,
    pub errcode: Option<i64>,
    pub errmsg: Option<String>,
}

impl UpstreamReply {
    /// Success: HTTP 2xx and `errcode` zero or absent.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status) && self.errcode.unwrap_or(0) == 0
    }

    fn from_transport_error(e: reqwest::Error) -> Self {
        Self {
            status: 0,
            errcode: None,
            errmsg: Some(format!("upstream request failed: {e}")),
        }
    }

    async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Self {
            status,
            errcode: body["errcode"].as_i64(),
            errmsg: body["errmsg"].as_str().map(str::to_string),
        }
    }
}

/// Result of the upload leg.
pub struct MediaUpload {
    pub reply: UpstreamReply,
    pub media_id: Option<String>,
}

/// HTTP client for the upstream webhook API.
pub struct Dispatcher {
    client: reqwest::Client,
    base: String,
}

impl Dispatcher {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("deaddrop-gateway/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.server.connect_timeout_secs.max(1)))
            .timeout(Duration::from_secs(config.server.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base: config.upstream_base.trim_end_matches('/').to_string(),
        })
    }

    /// Send one envelope to the webhook.
    pub async fn send(&self, key: &str, envelope: &Value) -> UpstreamReply {
        let url = format!("{}/send", self.base);
        let result = self
            .client
            .post(&url)
            .query(&[("key", key)])
            .json(envelope)
            .send()
            .await;
        match result {
            Ok(response) => UpstreamReply::from_response(response).await,
            Err(e) => {
                tracing::warn!(error = %e, "webhook send failed");
                UpstreamReply::from_transport_error(e)
            }
        }
    }

    /// Upload a file to obtain a `media_id`.
    ///
    /// The multipart body is assembled exactly once into a buffer so the
    /// request carries an accurate `Content-Length`.
    pub async fn upload_media(
        &self,
        key: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> ApiResult<MediaUpload> {
        if data.len() <= MIN_MEDIA_BYTES {
            return Err(ApiError::BadRequest(format!(
                "file too small for upload ({} bytes)",
                data.len()
            )));
        }
        if data.len() > MAX_MEDIA_BYTES {
            return Err(ApiError::PayloadTooLarge(format!(
                "file exceeds the 20 MB upload limit ({} bytes)",
                data.len()
            )));
        }

        let (boundary, body) = build_multipart(filename, content_type, data);
        let url = format!("{}/upload_media", self.base);
        let result = self
            .client
            .post(&url)
            .query(&[("key", key), ("type", "file")])
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await;

        let (reply, media_id) = match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let reply = UpstreamReply {
                    status,
                    errcode: body["errcode"].as_i64(),
                    errmsg: body["errmsg"].as_str().map(str::to_string),
                };
                let media_id = body["media_id"].as_str().map(str::to_string);
                (reply, media_id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "webhook media upload failed");
                (UpstreamReply::from_transport_error(e), None)
            }
        };
        Ok(MediaUpload { reply, media_id })
    }
}

/// Assemble a single-part `media` multipart body.
fn build_multipart(filename: &str, content_type: &str, data: &[u8]) -> (String, Vec<u8>) {
    let mut raw = [0u8; 8];
    OsRng.fill_bytes(&mut raw);
    let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
    let boundary = format!("----deaddrop{hex}");

    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"media\"; \
             filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (boundary, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_ok_requires_2xx_and_zero_errcode() {
        let ok = UpstreamReply {
            status: 200,
            errcode: Some(0),
            errmsg: None,
        };
        assert!(ok.ok());

        let no_errcode = UpstreamReply {
            status: 204,
            errcode: None,
            errmsg: None,
        };
        assert!(no_errcode.ok());

        let upstream_error = UpstreamReply {
            status: 200,
            errcode: Some(93000),
            errmsg: Some("invalid key".to_string()),
        };
        assert!(!upstream_error.ok());

        let transport = UpstreamReply {
            status: 0,
            errcode: None,
            errmsg: Some("connect refused".to_string()),
        };
        assert!(!transport.ok());
    }

    #[test]
    fn multipart_body_shape() {
        let (boundary, body) = build_multipart("report.pdf", "application/pdf", b"PDFDATA");
        assert!(boundary.starts_with("----deaddrop"));
        assert_eq!(boundary.len(), "----deaddrop".len() + 16);

        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.contains("name=\"media\"; filename=\"report.pdf\""));
        assert!(text.contains("Content-Type: application/pdf\r\n\r\nPDFDATA\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn boundaries_differ_between_calls() {
        let (a, _) = build_multipart("f", "t", b"123456");
        let (b, _) = build_multipart("f", "t", b"123456");
        assert_ne!(a, b);
    }
}
