//! Application state shared across handlers.

use crate::clientip::TrustedProxies;
use deaddrop_core::config::RelayConfig;
use deaddrop_state::StateActor;
use deaddrop_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<RelayConfig>,
    /// Blob store backend.
    pub storage: Arc<dyn ObjectStore>,
    /// The serialized state actor.
    pub actor: Arc<StateActor>,
    /// Trusted proxy configuration for uploader IP resolution.
    pub trusted_proxies: Arc<TrustedProxies>,
}

impl AppState {
    /// Build application state. Panics on invalid configuration; startup is
    /// the only caller and wants to fail fast.
    pub fn new(config: RelayConfig, storage: Arc<dyn ObjectStore>, actor: Arc<StateActor>) -> Self {
        if let Err(error) = config.validate() {
            panic!("invalid relay configuration: {error}");
        }
        let trusted_proxies = TrustedProxies::from_config(&config.server.trusted_proxies);
        Self {
            config: Arc::new(config),
            storage,
            actor,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    /// Best-effort blob deletion on a detached task.
    ///
    /// Removal paths hand object keys back from the actor; losing one of
    /// these deletes only leaks store bytes, never metadata.
    pub fn schedule_deletes(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let storage = self.storage.clone();
        tokio::spawn(async move {
            for key in keys {
                match storage.delete(&key).await {
                    Ok(()) => crate::metrics::OBJECTS_DELETED.inc(),
                    Err(deaddrop_storage::StorageError::NotFound(_)) => {}
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "scheduled blob delete failed");
                    }
                }
            }
        });
    }
}
