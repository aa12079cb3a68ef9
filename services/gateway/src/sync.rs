//! Target synchronization from the scheduler's event feed.
//!
//! Two feeds are supported:
//! - [`run_feed_loop`] tails the manager's SSE endpoint over HTTP with
//!   `catchUp=true`, so a freshly started gateway converges on the current
//!   target set before live events arrive; the stream is re-dialed after a
//!   delay whenever it drops.
//! - [`run_bus_sync`] consumes an in-process event bus for embedded
//!   deployments.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use osprey_events::{Event, EventBus, EventPayload};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::upstream::UpstreamRegistry;

/// Incremental parser for an SSE byte stream.
///
/// Only `data:` fields matter here; event names are carried inside the JSON
/// payload and comments/ids are skipped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    data: Vec<String>,
}

impl SseParser {
    /// Feeds one chunk, returning every completed `data` payload.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut complete = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Blank line terminates one event.
                if !self.data.is_empty() {
                    complete.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
            // `event:`, `id:`, `retry:` and comments are ignored.
        }

        complete
    }
}

/// Applies one decoded event to the registry.
async fn apply(registry: &UpstreamRegistry, event: &Event) {
    if let EventPayload::TargetChange(change) = &event.payload {
        debug!(change = %change, "applying target change");
        if let Err(err) = registry.apply_event(change).await {
            warn!(change = %change, error = %err, "rejected target change");
        }
    }
}

/// Tails the manager's SSE feed once, until the stream ends or errors.
pub async fn tail_feed_once(config: &Config, registry: &UpstreamRegistry) -> Result<()> {
    let url = format!("{}/events?catchUp=true", config.manager_url);
    info!(url = %url, "subscribing to manager event feed");

    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to subscribe to {url}"))?
        .error_for_status()
        .context("Manager rejected the event subscription")?;

    let mut stream = response.bytes_stream();
    let mut parser = SseParser::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Event feed read failed")?;
        let text = String::from_utf8_lossy(&chunk);
        for payload in parser.feed(&text) {
            match serde_json::from_str::<Event>(&payload) {
                Ok(event) => apply(registry, &event).await,
                Err(err) => warn!(error = %err, "undecodable event payload"),
            }
        }
    }

    Ok(())
}

/// Tails the manager's SSE feed forever, re-dialing after drops.
pub async fn run_feed_loop(config: &Config, registry: Arc<UpstreamRegistry>) -> Result<()> {
    loop {
        match tail_feed_once(config, &registry).await {
            Ok(()) => info!("event feed ended"),
            Err(err) => warn!(error = %err, "event feed failed"),
        }
        if config.once {
            return Ok(());
        }
        tokio::time::sleep(config.resync_delay).await;
    }
}

/// Consumes an in-process event bus until it closes.
pub async fn run_bus_sync(bus: Arc<EventBus>, registry: Arc<UpstreamRegistry>) {
    let mut subscription = bus.subscribe(None);
    info!(listener = %subscription.id, "gateway attached to in-process bus");
    while let Some(event) = subscription.rx.recv().await {
        apply(&registry, &event).await;
    }
    info!("in-process bus closed");
}
