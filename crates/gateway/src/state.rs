//! Application state shared across handlers.

use crate::dispatch::Dispatcher;
use deaddrop_core::config::GatewayConfig;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid gateway configuration: {e}"))?;
        let dispatcher = Dispatcher::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
        })
    }
}
