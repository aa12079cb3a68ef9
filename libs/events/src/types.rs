//! Event payload types shared between the scheduler and the routing plane.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use osprey_id::{AppId, TaskId, VersionId};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Targets
// =============================================================================

/// The routing plane's projection of a healthy running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub app_id: AppId,
    pub alias: String,
    pub version_id: VersionId,
    pub task_id: TaskId,
    pub task_ip: IpAddr,
    pub task_port: u16,
    pub weight: f64,
}

impl Target {
    /// Validates the cross-field invariants a router relies on.
    ///
    /// - the task ID must end with `-{app_id}`
    /// - the endpoint must be addressable (non-zero port)
    /// - the weight must be non-negative
    pub fn validate(&self) -> Result<(), EventError> {
        if !self.task_id.belongs_to(&self.app_id) {
            return Err(EventError::TaskIdSuffixMismatch {
                task_id: self.task_id.clone(),
                app_id: self.app_id.clone(),
            });
        }
        if self.task_port == 0 {
            return Err(EventError::MissingEndpoint {
                task_id: self.task_id.clone(),
            });
        }
        if self.weight < 0.0 {
            return Err(EventError::NegativeWeight {
                task_id: self.task_id.clone(),
                weight: self.weight,
            });
        }
        Ok(())
    }

    /// The HTTP base URL of this target.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.task_ip, self.task_port)
    }
}

/// The kind of change a [`TargetChangeEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetChange {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for TargetChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetChange::Add => f.write_str("add"),
            TargetChange::Update => f.write_str("update"),
            TargetChange::Delete => f.write_str("delete"),
        }
    }
}

/// A change to the set of routable targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetChangeEvent {
    pub change: TargetChange,
    pub target: Target,
}

impl std::fmt::Display for TargetChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{{}: app:{} task:{} {}:{} weight:{}}}",
            self.change,
            self.target.app_id,
            self.target.task_id,
            self.target.task_ip,
            self.target.task_port,
            self.target.weight,
        )
    }
}

// =============================================================================
// Task and App Lifecycle
// =============================================================================

/// A task lifecycle observation surfaced to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStateEvent {
    pub app_id: AppId,
    pub task_id: TaskId,
    pub slot_index: u32,
    /// The observed task state, in wire form (`pending`, `running`, ...).
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// An application state-machine transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStateEvent {
    pub app_id: AppId,
    pub from: String,
    pub to: String,
}

/// A slot that exhausted its restart budget and needs operator attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartBudgetEvent {
    pub app_id: AppId,
    pub slot_index: u32,
    pub restarts: u32,
}

// =============================================================================
// Envelope
// =============================================================================

/// The payload of a published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    TargetChange(TargetChangeEvent),
    TaskState(TaskStateEvent),
    AppState(AppStateEvent),
    RestartBudgetExhausted(RestartBudgetEvent),
}

/// A published event: payload plus occurrence time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Wraps a payload with the current time.
    #[must_use]
    pub fn now(payload: EventPayload) -> Self {
        Self {
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// The application this event belongs to, used for listener filtering.
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        match &self.payload {
            EventPayload::TargetChange(ev) => &ev.target.app_id,
            EventPayload::TaskState(ev) => &ev.app_id,
            EventPayload::AppState(ev) => &ev.app_id,
            EventPayload::RestartBudgetExhausted(ev) => &ev.app_id,
        }
    }

    /// The wire name of this event's type (`target.add`, `task.state`, ...).
    #[must_use]
    pub fn kind(&self) -> String {
        match &self.payload {
            EventPayload::TargetChange(ev) => format!("target.{}", ev.change),
            EventPayload::TaskState(ev) => format!("task.{}", ev.state),
            EventPayload::AppState(_) => "app.state_changed".to_string(),
            EventPayload::RestartBudgetExhausted(_) => "slot.restart_budget_exhausted".to_string(),
        }
    }
}
