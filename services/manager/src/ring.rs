//! Bounded per-application ring of healthy-task events.
//!
//! The scheduler records every target `add`/`delete` here so that a new
//! subscriber asking for catch-up can be brought to the present before live
//! delivery begins.

use std::collections::{HashMap, VecDeque};

use osprey_events::Event;
use osprey_id::AppId;

/// Per-application ring buffer of recent target-change events.
#[derive(Debug)]
pub struct HealthyTaskRing {
    capacity: usize,
    per_app: HashMap<AppId, VecDeque<Event>>,
}

impl HealthyTaskRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            per_app: HashMap::new(),
        }
    }

    /// Records an event, evicting the oldest once the ring is full.
    pub fn record(&mut self, event: Event) {
        let ring = self.per_app.entry(event.app_id().clone()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    /// Replays recent events for one app, or for all apps in time order.
    pub fn replay(&self, app_id: Option<&AppId>) -> Vec<Event> {
        match app_id {
            Some(app_id) => self
                .per_app
                .get(app_id)
                .map(|ring| ring.iter().cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut events: Vec<Event> = self
                    .per_app
                    .values()
                    .flat_map(|ring| ring.iter().cloned())
                    .collect();
                events.sort_by_key(|event| event.occurred_at);
                events
            }
        }
    }

    /// Drops an application's history entirely.
    pub fn remove_app(&mut self, app_id: &AppId) {
        self.per_app.remove(app_id);
    }
}
