//! IP-affinity sessions.
//!
//! Each upstream owns one session table mapping a client IP to its pinned
//! target. Entries refresh on every hit and are swept by a background task
//! once idle past the TTL. The table has its own mutex, distinct from the
//! registry lock, so the proxy hot path never contends with target updates.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use osprey_events::Target;
use osprey_id::TaskId;
use tracing::debug;

/// Default session lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

struct Entry {
    target: Target,
    last_seen: Instant,
}

/// Session table for one upstream.
pub struct Sessions {
    inner: Mutex<HashMap<IpAddr, Entry>>,
    ttl: Duration,
    gc: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Sessions {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            gc: Mutex::new(None),
        })
    }

    /// Spawns the background sweeper. The task holds only a weak reference,
    /// so a table dropped without an explicit [`stop`](Self::stop) still
    /// winds down on its next tick.
    pub fn start_gc(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Sessions> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(sessions) = weak.upgrade() else {
                    return;
                };
                sessions.sweep();
            }
        });
        *self.gc.lock().expect("session gc lock poisoned") = Some(handle);
    }

    /// Stops the background sweeper.
    pub fn stop(&self) {
        if let Some(handle) = self.gc.lock().expect("session gc lock poisoned").take() {
            handle.abort();
        }
    }

    /// Returns the pinned target for `ip` if the session is still fresh,
    /// refreshing its TTL.
    pub fn get(&self, ip: IpAddr) -> Option<Target> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        match inner.get_mut(&ip) {
            Some(entry) if entry.last_seen.elapsed() < self.ttl => {
                entry.last_seen = Instant::now();
                Some(entry.target.clone())
            }
            Some(_) => {
                inner.remove(&ip);
                None
            }
            None => None,
        }
    }

    /// Pins (or re-pins) `ip` to `target`.
    pub fn update(&self, ip: IpAddr, target: Target) {
        self.inner.lock().expect("session lock poisoned").insert(
            ip,
            Entry {
                target,
                last_seen: Instant::now(),
            },
        );
    }

    /// Drops the session for one client.
    pub fn remove_ip(&self, ip: IpAddr) {
        self.inner.lock().expect("session lock poisoned").remove(&ip);
    }

    /// Drops every session pinned to `task_id` (the target went away).
    pub fn remove_task(&self, task_id: &TaskId) {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .retain(|_, entry| &entry.target.task_id != task_id);
    }

    /// Removes entries idle past the TTL.
    pub fn sweep(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        let before = inner.len();
        inner.retain(|_, entry| entry.last_seen.elapsed() < self.ttl);
        let removed = before - inner.len();
        if removed > 0 {
            debug!(removed, remaining = inner.len(), "swept idle sessions");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
