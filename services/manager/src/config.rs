//! Manager configuration (env-driven).

use std::time::Duration;

use anyhow::{Context, Result};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Consecutive relaunches allowed for a slot before it is parked and an
    /// operator-attention event is emitted.
    pub restart_budget: u32,

    /// Per-application capacity of the healthy-task event ring served to
    /// catch-up subscribers.
    pub healthy_ring: usize,

    /// Refuse interval attached to declined offers so they return promptly.
    pub refuse_seconds: u64,

    /// Per-listener event bus buffer.
    pub event_buffer: usize,

    /// Default rolling-update batch size when a directive does not name one.
    pub update_batch: usize,

    /// Base delay for driver reconnect backoff.
    pub backoff_base: Duration,

    /// Maximum delay for driver reconnect backoff.
    pub backoff_max: Duration,

    /// Consecutive driver call failures tolerated before the connection is
    /// considered lost.
    pub driver_failure_budget: u32,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            restart_budget: 3,
            healthy_ring: 64,
            refuse_seconds: 5,
            event_buffer: 256,
            update_batch: 1,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            driver_failure_budget: 3,
            log_level: "info".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let restart_budget: u32 = std::env::var("OSPREY_RESTART_BUDGET")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_RESTART_BUDGET must be an integer.")?
            .unwrap_or(defaults.restart_budget);

        let healthy_ring: usize = std::env::var("OSPREY_HEALTHY_RING")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_HEALTHY_RING must be an integer.")?
            .unwrap_or(defaults.healthy_ring)
            .clamp(1, 4096);

        let refuse_seconds: u64 = std::env::var("OSPREY_REFUSE_SECONDS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_REFUSE_SECONDS must be an integer.")?
            .unwrap_or(defaults.refuse_seconds)
            .clamp(1, 300);

        let event_buffer: usize = std::env::var("OSPREY_EVENT_BUFFER")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_EVENT_BUFFER must be an integer.")?
            .unwrap_or(defaults.event_buffer)
            .clamp(16, 65536);

        let update_batch: usize = std::env::var("OSPREY_UPDATE_BATCH")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_UPDATE_BATCH must be an integer.")?
            .unwrap_or(defaults.update_batch)
            .max(1);

        let backoff_base_ms: u64 = std::env::var("OSPREY_BACKOFF_BASE_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_BACKOFF_BASE_MS must be an integer (milliseconds).")?
            .unwrap_or(defaults.backoff_base.as_millis() as u64)
            .max(50);

        let backoff_max_secs: u64 = std::env::var("OSPREY_BACKOFF_MAX_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_BACKOFF_MAX_SECS must be an integer (seconds).")?
            .unwrap_or(defaults.backoff_max.as_secs())
            .max(1);

        let driver_failure_budget: u32 = std::env::var("OSPREY_DRIVER_FAILURE_BUDGET")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("OSPREY_DRIVER_FAILURE_BUDGET must be an integer.")?
            .unwrap_or(defaults.driver_failure_budget)
            .max(1);

        let log_level =
            std::env::var("OSPREY_LOG_LEVEL").unwrap_or_else(|_| defaults.log_level.clone());

        Ok(Self {
            restart_budget,
            healthy_ring,
            refuse_seconds,
            event_buffer,
            update_batch,
            backoff_base: Duration::from_millis(backoff_base_ms),
            backoff_max: Duration::from_secs(backoff_max_secs),
            driver_failure_budget,
            log_level,
        })
    }
}
