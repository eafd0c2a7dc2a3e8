//! Relay server binary.

use anyhow::{Context, Result};
use clap::Parser;
use deaddrop_core::config::RelayConfig;
use deaddrop_server::{AppState, create_router};
use deaddrop_state::{JsonFileStore, RelayLimits, StateActor};
use deaddrop_storage::{FilesystemBackend, ObjectStore};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// deaddrop - one-shot file relay
#[derive(Parser, Debug)]
#[command(name = "deaddropd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "UD_CONFIG", default_value = "config/relay.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("deaddrop v{}", env!("CARGO_PKG_VERSION"));

    // Config file is optional; env vars can provide everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("no config file found at {}", args.config);
    }

    let config: RelayConfig = figment
        .merge(Env::prefixed("UD_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    deaddrop_server::metrics::register_metrics();

    // Blob store, verified before accepting requests.
    let storage: Arc<dyn ObjectStore> = Arc::new(
        FilesystemBackend::new(&config.storage.path)
            .await
            .context("failed to initialize storage")?,
    );
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(path = %config.storage.path.display(), "blob store ready");

    // State actor with its persisted document.
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
            .context("failed to load relay state")?,
    );

    let state = AppState::new(config.clone(), storage, actor);

    // Periodic cleanup trigger.
    let interval = Duration::from_secs(config.server.cleanup_interval_secs.max(1));
    deaddrop_server::scheduler::spawn_cleanup_task(state.clone(), interval);
    tracing::info!(interval_secs = interval.as_secs(), "cleanup task spawned");

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
