//! Concrete launch attempts.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use osprey_id::{AgentId, TaskId, VersionId};
use serde::{Deserialize, Serialize};

/// Observed task status, as reported by the cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Killed | TaskStatus::Lost
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Staging => "staging",
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
            TaskStatus::Killed => "killed",
            TaskStatus::Lost => "lost",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One launch attempt bound to a slot and a version.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub version_id: VersionId,
    pub agent_id: AgentId,
    pub hostname: String,
    /// Reported by the first status update that carries one.
    pub ip: Option<IpAddr>,
    pub ports: Vec<u16>,
    pub status: TaskStatus,
    pub healthy: Option<bool>,
    pub launched_at: DateTime<Utc>,
}

impl Task {
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}
