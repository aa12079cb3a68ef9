//! Slots: the unit of scheduling.
//!
//! A slot is a reserved position `(app, index)` that runs at most one task
//! at a time. A replacement task is only created after the previous task
//! reached a terminal state; overlap is forbidden.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use osprey_events::Target;
use osprey_id::{AgentId, AppId, TaskId};

use super::{Task, TaskStatus, Version};

/// Observed slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No task; waiting for a matching offer.
    Pending,
    /// Matched to an offer; launch sent, not yet confirmed healthy-running.
    Assigned,
    /// Task runs and passes health (or no health check is defined).
    Running,
    /// Kill requested, terminal status not yet observed.
    Killing,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl SlotState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SlotState::Finished | SlotState::Failed | SlotState::Killed | SlotState::Lost
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Pending => "pending",
            SlotState::Assigned => "assigned",
            SlotState::Running => "running",
            SlotState::Killing => "killing",
            SlotState::Finished => "finished",
            SlotState::Failed => "failed",
            SlotState::Killed => "killed",
            SlotState::Lost => "lost",
        }
    }
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the owning application wants from this slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Running,
    Killed,
}

/// What a status observation meant for the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotObservation {
    /// The slot entered `running` (status running plus health, if checked).
    BecameRunning,
    /// The task reached a terminal status.
    Terminal {
        status: TaskStatus,
        was_running: bool,
    },
    /// Non-terminal progress (staging, starting, health flapping).
    Progress,
    /// Stale or unattributable update; no state changed.
    Ignored,
}

/// One running (or to-be-running) position of an application.
#[derive(Debug, Clone)]
pub struct Slot {
    pub app_id: AppId,
    pub index: u32,
    /// The version this slot is supposed to run. Replaced in place during
    /// rolling updates.
    pub version: Arc<Version>,
    pub desired: DesiredState,
    pub state: SlotState,
    pub task: Option<Task>,
    /// Launch attempts so far; makes every relaunch mint a fresh task ID.
    pub incarnation: u64,
    /// Consecutive failed launches while the app wants the slot running.
    pub restarts: u32,
    /// Set once the restart budget is spent; the slot parks until an
    /// operator intervenes.
    pub budget_exhausted: bool,
    /// Whether a kill was already issued for the current task.
    pub kill_sent: bool,
    /// The target advertised for the current task, if any. Cleared (with a
    /// delete event) before any replacement target is advertised.
    pub published: Option<Target>,
}

impl Slot {
    pub fn new(app_id: AppId, index: u32, version: Arc<Version>) -> Self {
        Self {
            app_id,
            index,
            version,
            desired: DesiredState::Running,
            state: SlotState::Pending,
            task: None,
            incarnation: 0,
            restarts: 0,
            budget_exhausted: false,
            kill_sent: false,
            published: None,
        }
    }

    /// Whether the matcher may place this slot on an offer.
    pub fn is_schedulable(&self) -> bool {
        self.state == SlotState::Pending
            && self.desired == DesiredState::Running
            && !self.budget_exhausted
    }

    pub fn has_live_task(&self) -> bool {
        self.task.as_ref().is_some_and(Task::is_live)
    }

    /// Binds the slot to an offer: mints a task and moves to `assigned`.
    /// Returns the fresh task's ID.
    pub fn assign(&mut self, agent_id: AgentId, hostname: String, ports: Vec<u16>) -> TaskId {
        self.incarnation += 1;
        let task_id = TaskId::compose(&self.app_id, self.index, self.incarnation);
        self.task = Some(Task {
            id: task_id.clone(),
            version_id: self.version.id,
            agent_id,
            hostname,
            ip: None,
            ports,
            status: TaskStatus::Staging,
            healthy: None,
            launched_at: Utc::now(),
        });
        self.state = SlotState::Assigned;
        self.kill_sent = false;
        task_id
    }

    /// Records that a kill is being requested for the current task.
    ///
    /// A slot without a live task jumps straight to `killed`.
    pub fn mark_killing(&mut self) {
        if self.has_live_task() {
            self.state = SlotState::Killing;
        } else {
            self.task = None;
            self.state = SlotState::Killed;
        }
    }

    /// Returns the slot to `pending` for a fresh launch attempt.
    pub fn repend(&mut self) {
        self.task = None;
        self.state = SlotState::Pending;
        self.kill_sent = false;
    }

    /// Applies a status observation for `task_id`.
    ///
    /// Updates for tasks other than the current one (earlier incarnations)
    /// are ignored.
    pub fn observe(
        &mut self,
        task_id: &TaskId,
        status: TaskStatus,
        ip: Option<IpAddr>,
        healthy: Option<bool>,
    ) -> SlotObservation {
        let Some(task) = self.task.as_mut() else {
            return SlotObservation::Ignored;
        };
        if &task.id != task_id {
            return SlotObservation::Ignored;
        }

        task.status = status;
        if let Some(ip) = ip {
            task.ip = Some(ip);
        }
        if healthy.is_some() {
            task.healthy = healthy;
        }

        if status.is_terminal() {
            let was_running = self.state == SlotState::Running;
            self.state = match status {
                TaskStatus::Finished => SlotState::Finished,
                TaskStatus::Failed => SlotState::Failed,
                TaskStatus::Killed => SlotState::Killed,
                _ => SlotState::Lost,
            };
            return SlotObservation::Terminal { status, was_running };
        }

        match status {
            TaskStatus::Running => {
                let health_ok =
                    self.version.health_check.is_none() || task.healthy == Some(true);
                if health_ok && self.state != SlotState::Running && self.state != SlotState::Killing
                {
                    self.state = SlotState::Running;
                    self.restarts = 0;
                    SlotObservation::BecameRunning
                } else {
                    SlotObservation::Progress
                }
            }
            _ => SlotObservation::Progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Protocol;

    fn version(health: bool) -> Arc<Version> {
        let mut builder = Version::builder()
            .image("nginx:1.25")
            .instances(1)
            .port(Some("web"), 80, Protocol::Tcp);
        if health {
            builder = builder.health_check(crate::state::HealthCheck {
                path: "/health".to_string(),
                port_index: 0,
                grace_seconds: 10,
                interval_seconds: 5,
                max_consecutive_failures: 3,
            });
        }
        builder.build().unwrap()
    }

    fn slot(health: bool) -> Slot {
        Slot::new("web".parse().unwrap(), 0, version(health))
    }

    #[test]
    fn assign_mints_incarnating_task_ids() {
        let mut slot = slot(false);
        let first = slot.assign(AgentId::new("a1"), "h1".to_string(), vec![31000]);
        slot.repend();
        let second = slot.assign(AgentId::new("a1"), "h1".to_string(), vec![31000]);
        assert_eq!(first.as_str(), "0-1-web");
        assert_eq!(second.as_str(), "0-2-web");
    }

    #[test]
    fn running_without_health_check() {
        let mut slot = slot(false);
        let task_id = slot.assign(AgentId::new("a1"), "h1".to_string(), vec![31000]);

        let obs = slot.observe(&task_id, TaskStatus::Running, Some("10.0.0.1".parse().unwrap()), None);
        assert_eq!(obs, SlotObservation::BecameRunning);
        assert_eq!(slot.state, SlotState::Running);
    }

    #[test]
    fn running_waits_for_health_when_checked() {
        let mut slot = slot(true);
        let task_id = slot.assign(AgentId::new("a1"), "h1".to_string(), vec![31000]);

        let obs = slot.observe(&task_id, TaskStatus::Running, None, None);
        assert_eq!(obs, SlotObservation::Progress);
        assert_eq!(slot.state, SlotState::Assigned);

        let obs = slot.observe(&task_id, TaskStatus::Running, None, Some(true));
        assert_eq!(obs, SlotObservation::BecameRunning);
    }

    #[test]
    fn terminal_reports_whether_slot_was_running() {
        let mut slot = slot(false);
        let task_id = slot.assign(AgentId::new("a1"), "h1".to_string(), vec![31000]);
        slot.observe(&task_id, TaskStatus::Running, None, None);

        let obs = slot.observe(&task_id, TaskStatus::Failed, None, None);
        assert_eq!(
            obs,
            SlotObservation::Terminal {
                status: TaskStatus::Failed,
                was_running: true,
            }
        );
        assert_eq!(slot.state, SlotState::Failed);
    }

    #[test]
    fn stale_incarnation_updates_are_ignored() {
        let mut slot = slot(false);
        let old = slot.assign(AgentId::new("a1"), "h1".to_string(), vec![31000]);
        slot.repend();
        slot.assign(AgentId::new("a2"), "h2".to_string(), vec![31001]);

        let obs = slot.observe(&old, TaskStatus::Failed, None, None);
        assert_eq!(obs, SlotObservation::Ignored);
        assert_eq!(slot.state, SlotState::Assigned);
    }

    #[test]
    fn mark_killing_without_task_terminates_immediately() {
        let mut slot = slot(false);
        slot.desired = DesiredState::Killed;
        slot.mark_killing();
        assert_eq!(slot.state, SlotState::Killed);
    }
}
