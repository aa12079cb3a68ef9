//! osprey Gateway
//!
//! L7 routing plane: consumes the scheduler's target-change feed and proxies
//! inbound HTTP traffic to healthy task endpoints with weighted balancing
//! and IP-affinity sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use osprey_gateway::proxy::{self, ProxyState};
use osprey_gateway::sync;
use osprey_gateway::{Config, UpstreamRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to OSPREY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting osprey gateway");
    info!(
        listen_addr = %config.listen_addr,
        base_domain = %config.base_domain,
        manager_url = %config.manager_url,
        session_ttl_secs = config.session_ttl.as_secs(),
        gc_interval_secs = config.gc_interval.as_secs(),
        "Configuration loaded"
    );

    let registry = Arc::new(UpstreamRegistry::new(config.session_ttl, config.gc_interval));

    let feed_config = config.clone();
    let feed_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(err) = sync::run_feed_loop(&feed_config, feed_registry).await {
            tracing::error!(error = %err, "event feed loop ended");
        }
    });

    let state = ProxyState::new(registry, config.base_domain.clone());
    let app = proxy::router(state);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "proxy listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("proxy server failed")?;

    Ok(())
}
