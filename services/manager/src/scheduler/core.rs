//! The synchronous scheduler core.
//!
//! The core owns the application registry and is the single place registry
//! state is mutated. It is deliberately synchronous and side-effect free
//! toward the cluster: every entry point returns the [`ClusterOp`]s the
//! caller must execute against the driver, while events are published to the
//! bus and the healthy-task ring as state changes are observed. The async
//! worker wraps this with channels; tests drive it directly.

use std::sync::Arc;

use osprey_events::{
    AppStateEvent, Event, EventBus, EventPayload, RestartBudgetEvent, Target, TargetChange,
    TargetChangeEvent, TaskStateEvent,
};
use osprey_id::{AppId, FrameworkId, OfferId, TaskId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::offer::{Offer, OfferAccount};
use crate::ring::HealthyTaskRing;
use crate::state::{can_transit, App, AppState, DesiredState, Slot, SlotObservation, TaskStatus, Version};

use super::driver::{LaunchSpec, StatusUpdate};
use super::matcher::match_offer;

/// An operator request to register a new application.
#[derive(Debug, Clone)]
pub struct AppSpec {
    pub id: AppId,
    pub alias: String,
    pub version: Arc<Version>,
}

/// A driver call the worker must perform.
#[derive(Debug, Clone)]
pub enum ClusterOp {
    Launch {
        offer_id: OfferId,
        tasks: Vec<LaunchSpec>,
    },
    Kill {
        task_id: TaskId,
    },
    Decline {
        offer_id: OfferId,
        refuse_seconds: u64,
    },
    Revive,
}

/// Read-model of one slot for operator queries.
#[derive(Debug, Clone, Serialize)]
pub struct SlotInfo {
    pub index: u32,
    pub state: String,
    pub version_id: String,
    pub task_id: Option<TaskId>,
    pub hostname: Option<String>,
    pub restarts: u32,
}

/// Read-model of one application for operator queries.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub id: AppId,
    pub alias: String,
    pub state: String,
    pub instances: u32,
    pub running: usize,
    pub version_id: String,
    pub slots: Vec<SlotInfo>,
}

/// The registry-owning scheduler core.
pub struct SchedulerCore {
    cfg: ManagerConfig,
    bus: Arc<EventBus>,
    ring: HealthyTaskRing,
    /// Creation-ordered registry; matching walks it front to back.
    apps: Vec<App>,
    framework_id: Option<FrameworkId>,
}

impl SchedulerCore {
    pub fn new(cfg: ManagerConfig, bus: Arc<EventBus>) -> Self {
        let ring = HealthyTaskRing::new(cfg.healthy_ring);
        Self {
            cfg,
            bus,
            ring,
            apps: Vec::new(),
            framework_id: None,
        }
    }

    pub fn framework_id(&self) -> Option<&FrameworkId> {
        self.framework_id.as_ref()
    }

    // =========================================================================
    // Operator commands
    // =========================================================================

    /// Registers a new application and pends its slots.
    pub fn create_app(&mut self, spec: AppSpec) -> Result<Vec<ClusterOp>, ManagerError> {
        if self.apps.iter().any(|app| app.id == spec.id) {
            return Err(ManagerError::conflict(format!(
                "app '{}' already exists",
                spec.id
            )));
        }
        if self.apps.iter().any(|app| app.alias == spec.alias) {
            return Err(ManagerError::conflict(format!(
                "alias '{}' already in use",
                spec.alias
            )));
        }

        let app = App::new(spec.id.clone(), spec.alias, spec.version);
        info!(app_id = %app.id, instances = app.instances, "app registered");
        self.apps.push(app);
        Ok(vec![ClusterOp::Revive])
    }

    /// Appends `delta` pending slots at indices `[N, N+delta)`.
    pub fn scale_up(&mut self, app_id: &AppId, delta: u32) -> Result<Vec<ClusterOp>, ManagerError> {
        if delta == 0 {
            return Err(ManagerError::InvalidSpec("delta must be positive".to_string()));
        }
        let app_idx = self.app_idx(app_id)?;
        self.try_transit(app_idx, AppState::ScaleUp)?;

        let app = &mut self.apps[app_idx];
        let old = app.instances;
        app.instances = old + delta;
        for index in old..app.instances {
            app.slots
                .insert(index, Slot::new(app.id.clone(), index, app.version.clone()));
        }
        info!(app_id = %app.id, from = old, to = app.instances, "scaling up");
        Ok(vec![ClusterOp::Revive])
    }

    /// Kills the highest-index `delta` slots and shrinks the registry.
    pub fn scale_down(
        &mut self,
        app_id: &AppId,
        delta: u32,
    ) -> Result<Vec<ClusterOp>, ManagerError> {
        let app_idx = self.app_idx(app_id)?;
        {
            let app = &self.apps[app_idx];
            if delta == 0 || delta >= app.instances {
                return Err(ManagerError::InvalidSpec(format!(
                    "delta must be in [1, {})",
                    app.instances
                )));
            }
        }
        self.try_transit(app_idx, AppState::ScaleDown)?;

        let mut ops = Vec::new();
        let app = &mut self.apps[app_idx];
        let old = app.instances;
        app.instances = old - delta;
        let cutoff = app.instances;
        for index in (cutoff..old).rev() {
            if let Some(slot) = app.slots.get_mut(&index) {
                slot.desired = DesiredState::Killed;
                if slot.has_live_task() && !slot.kill_sent {
                    slot.kill_sent = true;
                    ops.push(ClusterOp::Kill {
                        task_id: slot.task.as_ref().expect("live task").id.clone(),
                    });
                }
                slot.mark_killing();
            }
        }
        info!(app_id = %app.id, from = old, to = app.instances, "scaling down");
        ops.extend(self.step_app(app_idx));
        Ok(ops)
    }

    /// Begins a rolling update toward `version`.
    pub fn update_app(
        &mut self,
        app_id: &AppId,
        version: Arc<Version>,
        batch: Option<usize>,
    ) -> Result<Vec<ClusterOp>, ManagerError> {
        let app_idx = self.app_idx(app_id)?;
        self.try_transit(app_idx, AppState::Updating)?;

        let batch = batch.unwrap_or(self.cfg.update_batch).max(1);
        let app = &mut self.apps[app_idx];
        app.prev_version = Some(app.version.clone());
        app.version = version;
        app.update_batch = batch;
        info!(
            app_id = %app.id,
            version_id = %app.version.id,
            batch,
            "rolling update started"
        );
        let mut ops = vec![ClusterOp::Revive];
        ops.extend(self.step_app(app_idx));
        Ok(ops)
    }

    /// Rolls slots still on the update's new version back to the previous one.
    pub fn cancel_update(&mut self, app_id: &AppId) -> Result<Vec<ClusterOp>, ManagerError> {
        let app_idx = self.app_idx(app_id)?;
        if self.apps[app_idx].prev_version.is_none() {
            return Err(ManagerError::conflict(format!(
                "app '{app_id}' has no update in flight"
            )));
        }
        self.try_transit(app_idx, AppState::CancelUpdate)?;
        info!(app_id = %app_id, "rolling update cancelled");
        let mut ops = vec![ClusterOp::Revive];
        ops.extend(self.step_app(app_idx));
        Ok(ops)
    }

    /// Kills everything and removes the application once all slots settle.
    pub fn delete_app(&mut self, app_id: &AppId) -> Result<Vec<ClusterOp>, ManagerError> {
        let app_idx = self.app_idx(app_id)?;
        self.try_transit(app_idx, AppState::Deleting)?;

        let app = &mut self.apps[app_idx];
        for slot in app.slots.values_mut() {
            slot.desired = DesiredState::Killed;
        }
        info!(app_id = %app_id, "app deletion started");
        Ok(self.step_app(app_idx))
    }

    pub fn app_info(&self, app_id: &AppId) -> Result<AppInfo, ManagerError> {
        let app_idx = self.app_idx(app_id)?;
        Ok(render_app(&self.apps[app_idx]))
    }

    pub fn list_apps(&self) -> Vec<AppInfo> {
        self.apps.iter().map(render_app).collect()
    }

    /// Recent healthy-task events for catch-up subscribers.
    pub fn healthy_history(&self, app_id: Option<&AppId>) -> Vec<Event> {
        self.ring.replay(app_id)
    }

    // =========================================================================
    // Driver callbacks
    // =========================================================================

    /// Matches one offer against pending demand.
    pub fn handle_offer(&mut self, offer: &Offer) -> Vec<ClusterOp> {
        let mut account = OfferAccount::new(offer);
        let assignments = match_offer(&self.apps, &mut account);

        if assignments.is_empty() {
            debug!(offer_id = %offer.id, hostname = %offer.hostname, "no eligible slot, declining");
            return vec![ClusterOp::Decline {
                offer_id: offer.id.clone(),
                refuse_seconds: self.cfg.refuse_seconds,
            }];
        }

        let mut tasks = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let app = &mut self.apps[assignment.app_idx];
            let app_id = app.id.clone();
            let slot = app
                .slots
                .get_mut(&assignment.slot_index)
                .expect("matched slot exists");
            let ports = assignment.ports;
            let task_id = slot.assign(offer.agent_id.clone(), offer.hostname.clone(), ports.clone());
            info!(
                app_id = %app_id,
                slot = slot.index,
                task_id = %task_id,
                hostname = %offer.hostname,
                "slot assigned"
            );
            tasks.push(LaunchSpec {
                task_id,
                app_id,
                slot_index: slot.index,
                version_id: slot.version.id,
                image: slot.version.image.clone(),
                resources: slot.version.resources,
                ports,
                agent_id: offer.agent_id.clone(),
                hostname: offer.hostname.clone(),
            });
            let event = task_event(slot);
            self.bus.publish(event);
        }

        vec![ClusterOp::Launch {
            offer_id: offer.id.clone(),
            tasks,
        }]
    }

    /// An offer disappeared before we used it. Offers are matched on
    /// arrival and never stored, so there is nothing to roll back.
    pub fn handle_rescind(&mut self, offer_id: &OfferId) {
        debug!(offer_id = %offer_id, "offer rescinded");
    }

    /// Applies a task status callback and drives the owning state machine.
    pub fn handle_status(&mut self, update: &StatusUpdate) -> Vec<ClusterOp> {
        let Some(app_idx) = self
            .apps
            .iter()
            .position(|app| update.task_id.belongs_to(&app.id))
        else {
            if update.status.is_terminal() {
                return Vec::new();
            }
            warn!(task_id = %update.task_id, "status for unknown task, killing");
            return vec![ClusterOp::Kill {
                task_id: update.task_id.clone(),
            }];
        };

        let mut ops = Vec::new();
        {
            let app = &mut self.apps[app_idx];
            let alias = app.alias.clone();
            let Some(slot_index) = update.task_id.slot_index() else {
                warn!(task_id = %update.task_id, "malformed task ID in status update");
                return Vec::new();
            };
            let Some(slot) = app.slots.get_mut(&slot_index) else {
                if !update.status.is_terminal() {
                    warn!(task_id = %update.task_id, "status for unknown slot, killing");
                    ops.push(ClusterOp::Kill {
                        task_id: update.task_id.clone(),
                    });
                }
                return ops;
            };

            let observation =
                slot.observe(&update.task_id, update.status, update.ip, update.healthy);

            match observation {
                SlotObservation::Ignored => return ops,
                SlotObservation::BecameRunning => {
                    self.bus.publish(task_event(slot));
                    if let Some(target) = target_for(&alias, slot) {
                        let change = if slot.published.is_some() {
                            TargetChange::Update
                        } else {
                            TargetChange::Add
                        };
                        slot.published = Some(target.clone());
                        emit_target(&mut self.ring, &self.bus, change, target);
                    }
                }
                SlotObservation::Progress => {
                    self.bus.publish(task_event(slot));
                }
                SlotObservation::Terminal { status, .. } => {
                    self.bus.publish(task_event(slot));
                    // Delete precedes any replacement add for this slot.
                    if let Some(target) = slot.published.take() {
                        emit_target(&mut self.ring, &self.bus, TargetChange::Delete, target);
                    }

                    if slot.desired == DesiredState::Running {
                        if status == TaskStatus::Killed {
                            // A kill we initiated (rolling update / cancel);
                            // relaunch without charging the restart budget.
                            slot.repend();
                            ops.push(ClusterOp::Revive);
                        } else {
                            slot.restarts += 1;
                            if slot.restarts > self.cfg.restart_budget {
                                slot.budget_exhausted = true;
                                warn!(
                                    app_id = %slot.app_id,
                                    slot = slot.index,
                                    restarts = slot.restarts,
                                    "restart budget exhausted, parking slot"
                                );
                                self.bus.publish(Event::now(
                                    EventPayload::RestartBudgetExhausted(RestartBudgetEvent {
                                        app_id: slot.app_id.clone(),
                                        slot_index: slot.index,
                                        restarts: slot.restarts,
                                    }),
                                ));
                            } else {
                                slot.repend();
                                ops.push(ClusterOp::Revive);
                            }
                        }
                    }
                }
            }
        }

        ops.extend(self.step_app(app_idx));
        ops
    }

    /// Registration (or failover re-registration) completed.
    pub fn handle_reregistered(&mut self, framework_id: FrameworkId) -> Vec<ClusterOp> {
        info!(framework_id = %framework_id, "framework registered");
        self.framework_id = Some(framework_id);

        // Kills sent over the old connection may be lost; re-arm them.
        for app in &mut self.apps {
            for slot in app.slots.values_mut() {
                if slot.state == crate::state::SlotState::Killing {
                    slot.kill_sent = false;
                }
            }
        }

        let mut ops = vec![ClusterOp::Revive];
        for app_idx in (0..self.apps.len()).rev() {
            ops.extend(self.step_app(app_idx));
        }
        ops
    }

    // =========================================================================
    // State machine progression
    // =========================================================================

    /// Drives the app's state machine one idempotent step.
    fn step_app(&mut self, app_idx: usize) -> Vec<ClusterOp> {
        let mut ops = Vec::new();
        match self.apps[app_idx].state {
            AppState::Creating | AppState::ScaleUp => {
                let app = &mut self.apps[app_idx];
                if app.slots.len() as u32 == app.instances && app.all_slots_running() {
                    transit(&self.bus, app, AppState::Normal);
                }
            }
            AppState::ScaleDown => {
                let app = &mut self.apps[app_idx];
                let cutoff = app.instances;
                app.slots.retain(|index, slot| {
                    !(*index >= cutoff
                        && slot.desired == DesiredState::Killed
                        && slot.state.is_terminal())
                });
                if app.slots.keys().all(|index| *index < cutoff) {
                    transit(&self.bus, app, AppState::Normal);
                }
            }
            AppState::Updating => ops.extend(self.step_rolling(app_idx, false)),
            AppState::CancelUpdate => ops.extend(self.step_rolling(app_idx, true)),
            AppState::Deleting => {
                let app = &mut self.apps[app_idx];
                for slot in app.slots.values_mut() {
                    if slot.has_live_task() {
                        if !slot.kill_sent {
                            slot.kill_sent = true;
                            ops.push(ClusterOp::Kill {
                                task_id: slot.task.as_ref().expect("live task").id.clone(),
                            });
                        }
                        slot.mark_killing();
                    } else if !slot.state.is_terminal() {
                        slot.mark_killing();
                    }
                }
                if app.all_slots_terminal() {
                    let app = self.apps.remove(app_idx);
                    self.ring.remove_app(&app.id);
                    info!(app_id = %app.id, "app removed from registry");
                }
            }
            AppState::Normal => {}
        }
        ops
    }

    /// One rolling step: convert up to `batch` slots toward the target
    /// version, oldest-index first (newest first when cancelling).
    fn step_rolling(&mut self, app_idx: usize, reverse: bool) -> Vec<ClusterOp> {
        let mut ops = Vec::new();
        let app = &mut self.apps[app_idx];

        let target = if reverse {
            app.prev_version
                .clone()
                .expect("cancel_update requires a previous version")
        } else {
            app.version.clone()
        };

        // Completion first: every slot converged and running.
        if app.converged_on(&target) {
            if reverse {
                app.version = target;
            }
            app.prev_version = None;
            transit(&self.bus, app, AppState::Normal);
            return ops;
        }

        let in_flight = app
            .slots
            .values()
            .filter(|slot| {
                slot.version.id == target.id && slot.state != crate::state::SlotState::Running
            })
            .count();
        let mut budget = app.update_batch.saturating_sub(in_flight);

        let mut candidates: Vec<u32> = app
            .slots
            .iter()
            .filter(|(_, slot)| slot.version.id != target.id)
            .map(|(index, _)| *index)
            .collect();
        if reverse {
            candidates.reverse();
        }

        for index in candidates {
            if budget == 0 {
                break;
            }
            let slot = app.slots.get_mut(&index).expect("candidate slot exists");
            slot.version = target.clone();
            slot.desired = DesiredState::Running;
            if slot.has_live_task() {
                if !slot.kill_sent {
                    slot.kill_sent = true;
                    slot.mark_killing();
                    ops.push(ClusterOp::Kill {
                        task_id: slot.task.as_ref().expect("live task").id.clone(),
                    });
                }
            } else if slot.state.is_terminal() {
                slot.repend();
                ops.push(ClusterOp::Revive);
            }
            // A pending slot simply relaunches with the target version.
            budget -= 1;
        }

        ops
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn app_idx(&self, app_id: &AppId) -> Result<usize, ManagerError> {
        self.apps
            .iter()
            .position(|app| &app.id == app_id)
            .ok_or_else(|| ManagerError::app_not_found(app_id))
    }

    fn try_transit(&mut self, app_idx: usize, to: AppState) -> Result<(), ManagerError> {
        let from = self.apps[app_idx].state;
        if !can_transit(from, to) {
            return Err(ManagerError::conflict(format!(
                "cannot transit app '{}' from '{from}' to '{to}'",
                self.apps[app_idx].id
            )));
        }
        transit(&self.bus, &mut self.apps[app_idx], to);
        Ok(())
    }
}

fn transit(bus: &EventBus, app: &mut App, to: AppState) {
    let from = app.state;
    app.state = to;
    info!(app_id = %app.id, from = %from, to = %to, "app state transition");
    bus.publish(Event::now(EventPayload::AppState(AppStateEvent {
        app_id: app.id.clone(),
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
    })));
}

fn emit_target(ring: &mut HealthyTaskRing, bus: &EventBus, change: TargetChange, target: Target) {
    let event = Event::now(EventPayload::TargetChange(TargetChangeEvent {
        change,
        target,
    }));
    ring.record(event.clone());
    bus.publish(event);
}

fn task_event(slot: &Slot) -> Event {
    let task = slot.task.as_ref();
    Event::now(EventPayload::TaskState(TaskStateEvent {
        app_id: slot.app_id.clone(),
        task_id: task
            .map(|task| task.id.clone())
            .unwrap_or_else(|| TaskId::compose(&slot.app_id, slot.index, slot.incarnation)),
        slot_index: slot.index,
        state: task
            .map(|task| task.status.as_str().to_string())
            .unwrap_or_else(|| "pending".to_string()),
        message: None,
    }))
}

/// Builds the routing target for a running slot, if it is addressable.
fn target_for(alias: &str, slot: &Slot) -> Option<Target> {
    let task = slot.task.as_ref()?;
    let ip = task.ip?;
    let port = *task.ports.first()?;
    Some(Target {
        app_id: slot.app_id.clone(),
        alias: alias.to_string(),
        version_id: slot.version.id,
        task_id: task.id.clone(),
        task_ip: ip,
        task_port: port,
        weight: slot.version.weight,
    })
}

fn render_app(app: &App) -> AppInfo {
    AppInfo {
        id: app.id.clone(),
        alias: app.alias.clone(),
        state: app.state.as_str().to_string(),
        instances: app.instances,
        running: app.running_count(),
        version_id: app.version.id.to_string(),
        slots: app
            .slots
            .values()
            .map(|slot| SlotInfo {
                index: slot.index,
                state: slot.state.as_str().to_string(),
                version_id: slot.version.id.to_string(),
                task_id: slot.task.as_ref().map(|task| task.id.clone()),
                hostname: slot.task.as_ref().map(|task| task.hostname.clone()),
                restarts: slot.restarts,
            })
            .collect(),
    }
}
