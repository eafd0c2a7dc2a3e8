//! HTTP surface of the one-shot file relay.
//!
//! The edge handler is stateless: it parses uploads, streams bytes to the
//! blob store, and renders responses. Every admission decision is made by the
//! state actor; every resource miss on the download path is an empty 404.

pub mod clientip;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
