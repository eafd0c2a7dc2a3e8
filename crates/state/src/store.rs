//! Persistence of the relay state document.
//!
//! The whole state is one JSON document stored under a single logical key.
//! `save` must be atomic: a crash mid-write leaves the previous document
//! intact.

use crate::model::RelayState;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Errors from state persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt state document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable home of the state document.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Load the persisted document, or `None` on first start.
    async fn load(&self) -> StoreResult<Option<RelayState>>;

    /// Persist the full document atomically.
    async fn save(&self, state: &RelayState) -> StoreResult<()>;
}

/// JSON file store with temp-file + rename writes.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> StoreResult<Option<RelayState>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let state = serde_json::from_slice(&data)?;
        Ok(Some(state))
    }

    async fn save(&self, state: &RelayState) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let encoded = serde_json::to_vec(state)?;

        let temp = self.path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(&encoded).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<Option<RelayState>>,
    /// When set, every `save` fails. Lets tests observe rollback behavior.
    pub fail_saves: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> StoreResult<Option<RelayState>> {
        Ok(self.inner.lock().expect("state store lock").clone())
    }

    async fn save(&self, state: &RelayState) -> StoreResult<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(StoreError::Io(std::io::Error::other("save disabled")));
        }
        *self.inner.lock().expect("state store lock") = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelayLimits;

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        assert!(store.load().await.unwrap().is_none());

        let mut state = RelayState::default();
        let mut retired = Vec::new();
        let lim = RelayLimits {
            rate_limit_sec: 0,
            max_pending: 0,
            ttl_sec: 0,
            api_key: None,
        };
        state
            .reserve(100, &lim, "ip", None, "a.txt", 1, "", &mut retired)
            .unwrap();
        state.hc();
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.tokens.len(), 1);
        assert_eq!(loaded.metrics.hc_count, 1);
    }

    #[tokio::test]
    async fn save_replaces_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        let state = RelayState::default();
        store.save(&state).await.unwrap();

        let mut next = RelayState::default();
        next.metrics.hc_count = 7;
        store.save(&next).await.unwrap();

        assert_eq!(store.load().await.unwrap().unwrap().metrics.hc_count, 7);
    }
}
