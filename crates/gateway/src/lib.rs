//! Webhook message-dispatch gateway.
//!
//! Accepts three request shapes on `POST /` (JSON, multipart, raw text),
//! reduces them to a typed message descriptor, and forwards a fixed JSON
//! envelope to the upstream chat webhook. Files go through a two-step
//! upload-then-send; the response carries both legs' status.

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod message;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
