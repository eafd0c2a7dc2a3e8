//! Configuration types for both deployables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Relay service configuration.
///
/// The flat fields map 1:1 onto the documented environment surface
/// (`UD_API_KEY`, `UD_MAX_MB`, ...); nested sections use the `__` separator
/// (`UD_SERVER__BIND`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upload API key. When set, uploads must present it via `?key=`,
    /// `X-API-Key`, or the `key` form field.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Path prefix all routes live under ("" or "/prefix").
    #[serde(default)]
    pub base_path: String,
    /// Upload size ceiling in MiB. Must be positive.
    #[serde(default = "default_max_mb")]
    pub max_mb: u64,
    /// Minimum seconds between uploads from one IP. Values <= 0 disable.
    #[serde(default = "default_rate_limit_sec")]
    pub rate_limit_sec: i64,
    /// Maximum number of ready (undownloaded) blobs. Values <= 0 disable.
    #[serde(default = "default_max_pending")]
    pub max_pending: i64,
    /// Seconds until an unclaimed blob expires. Values <= 0 disable.
    #[serde(default = "default_ttl_sec")]
    pub ttl_sec: i64,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// HTTP server section of the relay configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origin used when building download URLs (e.g., "https://drop.example").
    /// Falls back to the request's Host header when unset.
    #[serde(default)]
    pub public_origin: Option<String>,
    /// Proxies whose X-Forwarded-For / X-Real-IP headers are trusted.
    /// Entries are IPs or CIDRs; `"*"` trusts everyone (development only).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Mount the Prometheus /metrics endpoint. Off by default so the public
    /// surface stays limited to the relay routes.
    #[serde(default)]
    pub metrics_enabled: bool,
    /// Interval between scheduled cleanup passes.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Blob store section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

/// State persistence section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path of the persisted state document.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

/// Webhook gateway configuration (`QW_` environment prefix).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Upstream bot key appended to send/upload URLs. A per-request `?key=`
    /// query overrides it.
    #[serde(default)]
    pub webhook_key: Option<String>,
    /// Upstream webhook API base.
    #[serde(default = "default_upstream_base")]
    pub upstream_base: String,
    /// Comma-separated access token allowlist. Empty disables the check.
    #[serde(default)]
    pub tokens: String,
    #[serde(default)]
    pub server: GatewayServerConfig,
}

/// HTTP server section of the gateway configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayServerConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_gateway_bind() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_max_mb() -> u64 {
    50
}

fn default_rate_limit_sec() -> i64 {
    10
}

fn default_max_pending() -> i64 {
    10
}

fn default_ttl_sec() -> i64 {
    86400
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/objects")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./data/state.json")
}

fn default_upstream_base() -> String {
    "https://qyapi.weixin.qq.com/cgi-bin/webhook".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_origin: None,
            trusted_proxies: Vec::new(),
            metrics_enabled: false,
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_path: String::new(),
            max_mb: default_max_mb(),
            rate_limit_sec: default_rate_limit_sec(),
            max_pending: default_max_pending(),
            ttl_sec: default_ttl_sec(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            state: StateConfig::default(),
        }
    }
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            webhook_key: None,
            upstream_base: default_upstream_base(),
            tokens: String::new(),
            server: GatewayServerConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Upload size ceiling in bytes.
    pub fn max_bytes(&self) -> u64 {
        self.max_mb * 1024 * 1024
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_mb == 0 {
            return Err("max_mb must be positive".to_string());
        }
        if !self.base_path.is_empty() {
            if !self.base_path.starts_with('/') {
                return Err("base_path must start with '/'".to_string());
            }
            if self.base_path.ends_with('/') {
                return Err("base_path must not end with '/'".to_string());
            }
        }
        Ok(())
    }
}

impl GatewayConfig {
    /// Parsed access token allowlist.
    pub fn token_allowlist(&self) -> Vec<&str> {
        self.tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.upstream_base.is_empty() {
            return Err("upstream_base must not be empty".to_string());
        }
        Ok(())
    }
}
