//! Applications: the owners of slots.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use osprey_id::AppId;

use super::{AppState, Slot, SlotState, Version};

/// A registered application and its slots.
#[derive(Debug, Clone)]
pub struct App {
    pub id: AppId,
    /// Virtual-host key for L7 routing; unique across the registry.
    pub alias: String,
    /// The version new launches use.
    pub version: Arc<Version>,
    /// Retained during rolling update so `cancel_update` can restore it.
    pub prev_version: Option<Arc<Version>>,
    pub slots: BTreeMap<u32, Slot>,
    pub state: AppState,
    /// Desired instance count; starts at `version.instances` and follows
    /// scale directives.
    pub instances: u32,
    /// Rolling-step width of the in-flight update, if any.
    pub update_batch: usize,
    pub created_at: DateTime<Utc>,
}

impl App {
    /// Registers a new application in `creating` with its pending slots.
    pub fn new(id: AppId, alias: String, version: Arc<Version>) -> Self {
        let instances = version.instances;
        let mut slots = BTreeMap::new();
        for index in 0..instances {
            slots.insert(index, Slot::new(id.clone(), index, version.clone()));
        }
        Self {
            id,
            alias,
            version,
            prev_version: None,
            slots,
            state: AppState::Creating,
            instances,
            update_batch: 1,
            created_at: Utc::now(),
        }
    }

    /// Hostnames occupied by live tasks of this application.
    ///
    /// Includes assigned-but-not-yet-running tasks so that `unique hostname`
    /// holds across a burst of offers, not only after tasks report running.
    pub fn hostnames_in_use(&self) -> HashSet<String> {
        self.slots
            .values()
            .filter(|slot| slot.has_live_task())
            .filter_map(|slot| slot.task.as_ref().map(|task| task.hostname.clone()))
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.state == SlotState::Running)
            .count()
    }

    pub fn all_slots_running(&self) -> bool {
        !self.slots.is_empty()
            && self
                .slots
                .values()
                .all(|slot| slot.state == SlotState::Running)
    }

    pub fn all_slots_terminal(&self) -> bool {
        self.slots.values().all(|slot| slot.state.is_terminal())
    }

    /// Whether every slot runs `version` (used for update completion).
    pub fn converged_on(&self, version: &Version) -> bool {
        self.slots
            .values()
            .all(|slot| slot.version.id == version.id && slot.state == SlotState::Running)
    }
}
