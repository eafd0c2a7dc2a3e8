//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Attributes stored alongside a blob.
///
/// These exist so a raw store listing can be understood without consulting
/// the state actor; the actor's metadata remains the source of truth.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectAttrs {
    /// User-visible filename at upload time.
    pub filename: String,
    /// Upload time, epoch seconds (as a string for lossless round-trips
    /// through stores that only take string metadata).
    pub uploaded_at: String,
}

/// One entry of a prefix listing.
#[derive(Clone, Debug)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Opaque keyed blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Object size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<u64>;

    /// Fetch an object's full content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Fetch an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Store an object atomically.
    async fn put(&self, key: &str, data: Bytes, attrs: &ObjectAttrs) -> StorageResult<()>;

    /// Start a streaming write. The object becomes visible on `finish`.
    async fn put_stream(
        &self,
        key: &str,
        attrs: &ObjectAttrs,
    ) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Deleting a missing key reports `NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List objects under a prefix with their sizes.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>>;

    /// Verify the backend is reachable and usable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// In-flight streaming write.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Append a chunk.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Complete the write and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abandon the write, discarding buffered data.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
