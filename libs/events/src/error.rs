//! Error types for event construction and validation.

use osprey_id::{AppId, TaskId};
use thiserror::Error;

/// Errors raised when validating event payloads.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EventError {
    /// The target's task ID does not carry the `-{app_id}` suffix.
    #[error("task ID '{task_id}' is not suffixed by app ID '{app_id}'")]
    TaskIdSuffixMismatch { task_id: TaskId, app_id: AppId },

    /// The target is missing a usable endpoint.
    #[error("target for task '{task_id}' has no usable endpoint (port 0)")]
    MissingEndpoint { task_id: TaskId },

    /// The target carries a negative weight.
    #[error("target for task '{task_id}' has negative weight {weight}")]
    NegativeWeight { task_id: TaskId, weight: f64 },
}
