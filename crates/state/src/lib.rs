//! Serialized state actor for the deaddrop relay.
//!
//! All relay metadata lives in a single [`model::RelayState`] document owned
//! by a [`actor::StateActor`]. Every operation runs under one lock spanning
//! mutation and persistence, which is what makes the one-shot download
//! guarantee hold under concurrency: `claim` is the linearization point.

pub mod actor;
pub mod error;
pub mod model;
pub mod store;

pub use actor::{ClaimGrant, HealthSnapshot, ReserveGrant, ReserveRequest, StateActor};
pub use error::{OpError, OpResult};
pub use model::{RelayLimits, RelayState, TokenMeta, TokenStatus};
pub use store::{JsonFileStore, MemoryStore, StateStore, StoreError, StoreResult};
