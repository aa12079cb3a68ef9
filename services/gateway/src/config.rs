//! Gateway configuration (env-driven).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the proxy listens on.
    pub listen_addr: SocketAddr,

    /// Base domain for virtual-host classification
    /// (`<alias>.<base_domain>`, `<task>.<app>.<base_domain>`).
    pub base_domain: String,

    /// Manager base URL for the SSE event feed.
    pub manager_url: String,

    /// Session TTL.
    pub session_ttl: Duration,

    /// Session sweep interval.
    pub gc_interval: Duration,

    /// Delay before re-dialing the event feed after it drops.
    pub resync_delay: Duration,

    /// Exit after the first feed disconnect (dev/test convenience).
    pub once: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = std::env::var("OSPREY_GATEWAY_LISTEN")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("OSPREY_GATEWAY_LISTEN must be a socket address.")?;

        let base_domain = std::env::var("OSPREY_BASE_DOMAIN")
            .unwrap_or_else(|_| "osprey.local".to_string())
            .to_ascii_lowercase();

        let manager_url = std::env::var("OSPREY_MANAGER_URL")
            .unwrap_or_else(|_| "http://localhost:9090".to_string());

        let session_ttl_secs: u64 = std::env::var("OSPREY_SESSION_TTL_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_SESSION_TTL_SECS must be an integer (seconds).")?
            .unwrap_or(600)
            .max(1);

        let gc_interval_secs: u64 = std::env::var("OSPREY_SESSION_GC_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_SESSION_GC_SECS must be an integer (seconds).")?
            .unwrap_or(60)
            .max(1);

        let resync_delay_ms: u64 = std::env::var("OSPREY_RESYNC_DELAY_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_RESYNC_DELAY_MS must be an integer (milliseconds).")?
            .unwrap_or(1000)
            .max(50);

        let once = std::env::var("OSPREY_SYNC_ONCE")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let log_level = std::env::var("OSPREY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            base_domain,
            manager_url,
            session_ttl: Duration::from_secs(session_ttl_secs),
            gc_interval: Duration::from_secs(gc_interval_secs),
            resync_delay: Duration::from_millis(resync_delay_ms),
            once,
            log_level,
        })
    }
}
