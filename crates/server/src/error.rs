//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use deaddrop_state::OpError;
use deaddrop_storage::StorageError;

/// Relay API error.
///
/// Download-path misses collapse into [`ApiError::Opaque404`]: a body-less
/// 404 that gives an external observer no oracle to distinguish unknown
/// tokens, wrong filenames, expired entries, or already-claimed entries.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    Opaque404,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("length required")]
    LengthRequired,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("unauthorized")]
    Unauthorized,

    #[error("too many requests")]
    RateLimited,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<OpError> for ApiError {
    fn from(e: OpError) -> Self {
        match e {
            OpError::NotFound => Self::Opaque404,
            OpError::Unauthorized => Self::Unauthorized,
            OpError::TooManyRequests => Self::RateLimited,
            OpError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Opaque404 => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short status line for CLI clients.
    pub fn status_line(&self) -> String {
        match self {
            Self::Opaque404 => String::new(),
            Self::BadRequest(msg) => format!("error: {msg}\n"),
            Self::LengthRequired => "error: Content-Length required\n".to_string(),
            Self::PayloadTooLarge => "error: file too large\n".to_string(),
            Self::Unauthorized => "error: invalid or missing key\n".to_string(),
            Self::RateLimited => "error: rate limited, try again later\n".to_string(),
            Self::Storage(_) | Self::Internal(_) => "error: internal error\n".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Opaque404) {
            return StatusCode::NOT_FOUND.into_response();
        }
        if let Self::Storage(e) = &self {
            tracing::error!(error = %e, "storage failure surfaced to client");
        }
        if let Self::Internal(msg) = &self {
            tracing::error!(error = %msg, "internal failure surfaced to client");
        }
        (self.status_code(), self.status_line()).into_response()
    }
}

/// Result type for relay handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
