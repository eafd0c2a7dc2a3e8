//! Blob store abstraction for the deaddrop relay.
//!
//! The relay treats blob storage as an opaque keyed byte store: `put`, `get`,
//! `delete`, `list`. Object metadata here is debugging aid only; the state
//! actor's records are authoritative.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectAttrs, ObjectEntry, ObjectStore, StreamingUpload};
