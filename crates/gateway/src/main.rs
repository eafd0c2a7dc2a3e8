//! Webhook gateway binary.

use anyhow::{Context, Result};
use clap::Parser;
use deaddrop_core::config::GatewayConfig;
use deaddrop_gateway::{AppState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// deaddrop-gateway - webhook message dispatch
#[derive(Parser, Debug)]
#[command(name = "deaddrop-gateway")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "QW_CONFIG", default_value = "config/gateway.toml")]
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

    tracing::info!("deaddrop-gateway v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("no config file found at {}", args.config);
    }

    let config: GatewayConfig = figment
        .merge(Env::prefixed("QW_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    if config.webhook_key.is_none() {
        tracing::warn!("no webhook_key configured; requests must carry ?key=");
    }
    if config.token_allowlist().is_empty() {
        tracing::warn!("no access tokens configured; the gateway accepts anonymous requests");
    }

    let state = AppState::new(config.clone())?;
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
