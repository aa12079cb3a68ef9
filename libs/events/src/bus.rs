//! In-process event bus with per-listener bounded buffers.
//!
//! Fan-out rules:
//! - listeners are identified by UUID and may filter on one application
//! - each listener owns a bounded channel; a full buffer drops the event for
//!   that listener only, it never blocks the publisher
//! - listeners whose receiver has gone away are pruned on the next publish

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use osprey_id::AppId;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Event;

/// Default per-listener buffer capacity.
pub const DEFAULT_BUFFER: usize = 256;

struct Listener {
    filter: Option<AppId>,
    tx: mpsc::Sender<Event>,
}

/// A live subscription handed to a consumer.
pub struct Subscription {
    /// Listener identity, used to unsubscribe.
    pub id: Uuid,
    /// The event feed. Dropping it detaches the listener lazily.
    pub rx: mpsc::Receiver<Event>,
}

/// The event bus.
pub struct EventBus {
    listeners: Mutex<HashMap<Uuid, Listener>>,
    buffer: usize,
    dropped: AtomicU64,
}

impl EventBus {
    /// Creates a bus with the given per-listener buffer capacity.
    pub fn new(buffer: usize) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a listener. `filter = None` receives every event.
    pub fn subscribe(&self, filter: Option<AppId>) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.listeners
            .lock()
            .expect("event bus lock poisoned")
            .insert(id, Listener { filter, tx });
        debug!(listener = %id, "event listener attached");
        Subscription { id, rx }
    }

    /// Removes a listener.
    pub fn unsubscribe(&self, id: &Uuid) {
        if self
            .listeners
            .lock()
            .expect("event bus lock poisoned")
            .remove(id)
            .is_some()
        {
            debug!(listener = %id, "event listener detached");
        }
    }

    /// Publishes an event to every matching listener.
    ///
    /// Never blocks: a listener with a full buffer loses this event, and a
    /// listener whose receiver is gone is removed.
    pub fn publish(&self, event: Event) {
        let mut gone = Vec::new();
        {
            let listeners = self.listeners.lock().expect("event bus lock poisoned");
            for (id, listener) in listeners.iter() {
                if let Some(filter) = &listener.filter {
                    if filter != event.app_id() {
                        continue;
                    }
                }
                match listener.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            listener = %id,
                            kind = %event.kind(),
                            "listener buffer full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        gone.push(*id);
                    }
                }
            }
        }
        for id in gone {
            self.unsubscribe(&id);
        }
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("event bus lock poisoned").len()
    }

    /// Total events dropped due to full listener buffers.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Detaches every listener, closing their feeds.
    pub fn close(&self) {
        self.listeners
            .lock()
            .expect("event bus lock poisoned")
            .clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

// =============================================================================
// Process-global bus
// =============================================================================

static GLOBAL: RwLock<Option<Arc<EventBus>>> = RwLock::new(None);

/// Installs the process-global bus. A second call replaces the previous bus.
pub fn init(buffer: usize) -> Arc<EventBus> {
    let bus = Arc::new(EventBus::new(buffer));
    *GLOBAL.write().expect("global bus lock poisoned") = Some(bus.clone());
    bus
}

/// Returns the process-global bus, if installed.
pub fn get() -> Option<Arc<EventBus>> {
    GLOBAL.read().expect("global bus lock poisoned").clone()
}

/// Tears down the process-global bus, detaching all listeners.
pub fn shutdown() {
    if let Some(bus) = GLOBAL.write().expect("global bus lock poisoned").take() {
        bus.close();
    }
}
