//! Server test utilities.

use deaddrop_core::config::RelayConfig;
use deaddrop_server::{AppState, create_router};
use deaddrop_state::{JsonFileStore, RelayLimits, StateActor};
use deaddrop_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A test server wrapper with temp-dir-backed storage and state.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Test server with admission checks disabled.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Test server with a tweaked configuration. The base config disables
    /// rate limiting, the pending cap and TTL so tests opt in explicitly.
    pub async fn with_config(tweak: impl FnOnce(&mut RelayConfig)) -> Self {
        deaddrop_server::metrics::register_metrics();

        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        let mut config = RelayConfig::default();
        config.storage.path = temp_dir.path().join("objects");
        config.state.path = temp_dir.path().join("state.json");
        config.rate_limit_sec = 0;
        config.max_pending = 0;
        config.ttl_sec = 0;
        tweak(&mut config);

        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&config.storage.path)
                .await
                .expect("failed to create storage backend"),
        );

        let limits = RelayLimits {
            api_key: config.api_key.clone(),
            rate_limit_sec: config.rate_limit_sec,
            max_pending: config.max_pending,
            ttl_sec: config.ttl_sec,
        };
        let store = Arc::new(JsonFileStore::new(&config.state.path));
        let actor = Arc::new(
            StateActor::load(store, limits)
                .await
                .expect("failed to load state actor"),
        );

        let state = AppState::new(config, storage, actor);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Count stored blobs (sidecars excluded).
    pub async fn stored_objects(&self) -> usize {
        self.state
            .storage
            .list("obj/")
            .await
            .expect("list failed")
            .len()
    }
}
