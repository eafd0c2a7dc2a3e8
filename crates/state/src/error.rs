//! State actor failure surface.
//!
//! Operations either succeed with a structured payload or fail with one of
//! these kinds; the actor never panics across its boundary.

/// Failure kinds an actor operation can report.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OpError {
    /// Resource miss of any sort. Deliberately carries no detail: unknown
    /// token, wrong filename, expired and already-claimed all look the same
    /// to a caller.
    #[error("not found")]
    NotFound,

    /// Missing or wrong API key.
    #[error("unauthorized")]
    Unauthorized,

    /// Uploader hit the per-IP admission clock.
    #[error("too many requests")]
    TooManyRequests,

    /// Persistence failed; in-memory state was rolled back.
    #[error("state persistence failed: {0}")]
    Internal(String),
}

/// Result type for actor operations.
pub type OpResult<T> = std::result::Result<T, OpError>;
