//! Typed message descriptors and the request normalizer.
//!
//! Inbound payloads are deliberately loose: `type` tolerates aliases,
//! scalar fields are coerced to strings, and unknown keys are ignored.
//! The strict shape lives in [`crate::envelope`].

use crate::error::{ApiError, ApiResult};
use bytes::Bytes;
use serde_json::Value;

/// Maximum number of articles in a news message.
pub const MAX_ARTICLES: usize = 8;

/// One news card entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub picurl: Option<String>,
}

/// A normalized message, ready for envelope construction.
#[derive(Clone, Debug)]
pub enum Message {
    Text {
        content: String,
        mentioned_list: Vec<String>,
        mentioned_mobile_list: Vec<String>,
    },
    Markdown {
        content: String,
    },
    Image {
        base64: String,
        md5: Option<String>,
    },
    News {
        articles: Vec<Article>,
    },
    /// A file already uploaded upstream.
    FileRef {
        media_id: String,
    },
    /// A file that still needs the upload leg (or, for images, local
    /// base64+md5 conversion).
    FileUpload {
        filename: String,
        content_type: String,
        data: Bytes,
        as_image: bool,
    },
    /// Passed through verbatim after a shape check.
    TemplateCard {
        card: Value,
    },
}

/// Coerce a scalar JSON value to a string.
fn coerce_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_string_list(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|items| items.iter().filter_map(coerce_string).collect())
        .unwrap_or_default()
}

fn required_content(payload: &Value) -> ApiResult<String> {
    coerce_string(&payload["content"])
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("content is required".to_string()))
}

impl Message {
    /// Normalize a structured JSON payload.
    pub fn from_json(payload: &Value) -> ApiResult<Self> {
        if !payload.is_object() {
            return Err(ApiError::BadRequest("body must be a JSON object".to_string()));
        }
        let kind = payload["type"].as_str().unwrap_or("text");

        match kind {
            "text" => Ok(Self::Text {
                content: required_content(payload)?,
                mentioned_list: coerce_string_list(&payload["mentioned_list"]),
                mentioned_mobile_list: coerce_string_list(&payload["mentioned_mobile_list"]),
            }),
            "markdown" => Ok(Self::Markdown {
                content: required_content(payload)?,
            }),
            "image" => {
                let base64 = payload["base64"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ApiError::BadRequest("base64 is required".to_string()))?
                    .to_string();
                let md5 = payload["md5"].as_str().map(str::to_string);
                Ok(Self::Image { base64, md5 })
            }
            "news" | "link" => Self::news_from_json(payload),
            "file" => {
                let media_id = payload["media_id"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ApiError::BadRequest("media_id is required".to_string()))?
                    .to_string();
                Ok(Self::FileRef { media_id })
            }
            "template_card" => {
                let card = &payload["template_card"];
                if !card.is_object() {
                    return Err(ApiError::BadRequest(
                        "template_card must be an object".to_string(),
                    ));
                }
                Ok(Self::TemplateCard { card: card.clone() })
            }
            other => Err(ApiError::BadRequest(format!("unknown message type: {other}"))),
        }
    }

    fn news_from_json(payload: &Value) -> ApiResult<Self> {
        let articles: Vec<Article> = if let Some(items) = payload["articles"].as_array() {
            items
                .iter()
                .filter_map(|item| {
                    let title = item["title"].as_str().filter(|s| !s.is_empty())?;
                    let url = item["url"].as_str().filter(|s| !s.is_empty())?;
                    Some(Article {
                        title: title.to_string(),
                        url: url.to_string(),
                        description: item["description"].as_str().map(str::to_string),
                        picurl: item["picurl"].as_str().map(str::to_string),
                    })
                })
                .take(MAX_ARTICLES)
                .collect()
        } else if let (Some(title), Some(url)) = (
            payload["title"].as_str().filter(|s| !s.is_empty()),
            payload["url"].as_str().filter(|s| !s.is_empty()),
        ) {
            // Single-article convenience form.
            vec![Article {
                title: title.to_string(),
                url: url.to_string(),
                description: payload["description"].as_str().map(str::to_string),
                picurl: payload["picurl"].as_str().map(str::to_string),
            }]
        } else {
            Vec::new()
        };

        if articles.is_empty() {
            return Err(ApiError::BadRequest(
                "news requires articles with title and url".to_string(),
            ));
        }
        Ok(Self::News { articles })
    }

    /// Normalize a raw text body; `?type=markdown` switches channels.
    pub fn from_raw_text(body: &str, kind: Option<&str>) -> ApiResult<Self> {
        let content = body.trim().to_string();
        if content.is_empty() {
            return Err(ApiError::BadRequest("empty message body".to_string()));
        }
        match kind.unwrap_or("text") {
            "markdown" => Ok(Self::Markdown { content }),
            _ => Ok(Self::Text {
                content,
                mentioned_list: Vec::new(),
                mentioned_mobile_list: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_coerces_scalars() {
        let msg = Message::from_json(&json!({"type": "text", "content": 42})).unwrap();
        match msg {
            Message::Text { content, .. } => assert_eq!(content, "42"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn default_type_is_text() {
        let msg = Message::from_json(&json!({"content": "hi"})).unwrap();
        assert!(matches!(msg, Message::Text { .. }));
    }

    #[test]
    fn missing_content_is_rejected() {
        assert!(Message::from_json(&json!({"type": "text"})).is_err());
        assert!(Message::from_json(&json!({"type": "markdown", "content": ""})).is_err());
    }

    #[test]
    fn news_filters_and_truncates() {
        let articles: Vec<Value> = (0..12)
            .map(|i| json!({"title": format!("t{i}"), "url": format!("https://x/{i}")}))
            .chain([json!({"title": "no url"}), json!({"url": "https://no-title"})])
            .collect();
        let msg = Message::from_json(&json!({"type": "news", "articles": articles})).unwrap();
        match msg {
            Message::News { articles } => {
                assert_eq!(articles.len(), MAX_ARTICLES);
                assert_eq!(articles[0].title, "t0");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn link_alias_takes_single_form() {
        let msg = Message::from_json(
            &json!({"type": "link", "title": "T", "url": "https://x", "description": "d"}),
        )
        .unwrap();
        match msg {
            Message::News { articles } => {
                assert_eq!(articles.len(), 1);
                assert_eq!(articles[0].description.as_deref(), Some("d"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn news_without_usable_articles_is_rejected() {
        assert!(Message::from_json(&json!({"type": "news", "articles": []})).is_err());
        assert!(Message::from_json(&json!({"type": "news"})).is_err());
    }

    #[test]
    fn template_card_requires_object() {
        assert!(Message::from_json(&json!({"type": "template_card"})).is_err());
        assert!(
            Message::from_json(&json!({"type": "template_card", "template_card": "str"})).is_err()
        );
        assert!(
            Message::from_json(
                &json!({"type": "template_card", "template_card": {"card_type": "text_notice"}})
            )
            .is_ok()
        );
    }

    #[test]
    fn raw_text_defaults_and_markdown_switch() {
        assert!(matches!(
            Message::from_raw_text("hello", None).unwrap(),
            Message::Text { .. }
        ));
        assert!(matches!(
            Message::from_raw_text("**hi**", Some("markdown")).unwrap(),
            Message::Markdown { .. }
        ));
        assert!(Message::from_raw_text("   ", None).is_err());
    }
}
