//! HTTP request handlers.

pub mod common;
pub mod download;
pub mod health;
pub mod pages;
pub mod upload;

pub use download::*;
pub use health::*;
pub use pages::*;
pub use upload::*;

use crate::error::ApiError;

/// Fallback for every path and method outside the relay surface.
pub async fn not_found() -> ApiError {
    ApiError::Opaque404
}
