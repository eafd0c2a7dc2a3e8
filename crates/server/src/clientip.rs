//! Uploader IP resolution.
//!
//! By default only the direct connection IP counts; `X-Forwarded-For` and
//! `X-Real-IP` are honored only when the connecting peer is a configured
//! trusted proxy, so an uploader cannot spoof its way past the per-IP
//! admission clock.

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};

/// A parsed trusted proxy entry (single IP or CIDR range).
#[derive(Clone, Debug)]
enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

/// Trusted proxy configuration for IP extraction.
#[derive(Clone, Debug)]
pub struct TrustedProxies {
    mode: Mode,
}

#[derive(Clone, Debug)]
enum Mode {
    /// Never trust forwarded headers (default).
    None,
    /// Trust headers from all sources (development only).
    All,
    /// Trust headers only from specific IPs/CIDRs.
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    pub fn from_config(proxies: &[String]) -> Self {
        let mode = if proxies.is_empty() {
            Mode::None
        } else if proxies.len() == 1 && proxies[0] == "*" {
            Mode::All
        } else {
            let entries = proxies
                .iter()
                .filter_map(|p| {
                    if p.contains('/') {
                        match p.parse::<IpNet>() {
                            Ok(net) => Some(TrustedEntry::Cidr(net)),
                            Err(e) => {
                                tracing::warn!("invalid CIDR in trusted_proxies: '{p}': {e}");
                                None
                            }
                        }
                    } else {
                        match p.parse::<IpAddr>() {
                            Ok(ip) => Some(TrustedEntry::Ip(ip)),
                            Err(e) => {
                                tracing::warn!("invalid IP in trusted_proxies: '{p}': {e}");
                                None
                            }
                        }
                    }
                })
                .collect();
            Mode::List(entries)
        };
        Self { mode }
    }

    fn is_trusted(&self, connection_ip: &str) -> bool {
        match &self.mode {
            Mode::None => false,
            Mode::All => true,
            Mode::List(entries) => {
                let ip: IpAddr = match connection_ip.parse() {
                    Ok(ip) => ip,
                    Err(_) => return false,
                };
                entries.iter().any(|entry| match entry {
                    TrustedEntry::Ip(trusted) => *trusted == ip,
                    TrustedEntry::Cidr(network) => network.contains(&ip),
                })
            }
        }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(ip) = s.split(',').next()
    {
        return Some(ip.trim().to_string());
    }
    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(s) = real_ip.to_str()
    {
        return Some(s.trim().to_string());
    }
    None
}

/// Resolve the client IP from request parts.
pub fn client_ip(parts: &Parts, trusted: &TrustedProxies) -> String {
    let connection_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let trust_headers = match (&connection_ip, &trusted.mode) {
        (None, Mode::All) => true,
        (None, _) => false,
        (Some(conn_ip), _) => trusted.is_trusted(conn_ip),
    };

    if trust_headers && let Some(ip) = forwarded_ip(&parts.headers) {
        return ip;
    }

    connection_ip.unwrap_or_else(|| "unknown".to_string())
}
