//! Error taxonomy for the scheduler core.
//!
//! Recovery policy:
//! - `Transient` — retried with bounded exponential backoff inside the worker
//! - `Driver` — after the failure budget is spent, the driver is marked
//!   disconnected and the worker enters its reconnect loop
//! - `Resource` — the slot stays pending; never surfaced to operators
//! - `Conflict` / `Validation` / `NotFound` — surfaced to the originating
//!   operator command

use osprey_id::{AppId, TaskId};
use thiserror::Error;

use crate::constraint::{ParseError, ValidationError};

/// Errors surfaced by the scheduler core.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The constraint expression could not be parsed.
    #[error("constraint parse error: {0}")]
    Parse(#[from] ParseError),

    /// The constraint expression uses an unsupported predicate/subject pair.
    #[error("constraint validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An operation conflicts with current state (alias collision, illegal
    /// state-machine transition, duplicate app).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced app, slot, or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No offer satisfies a slot's requirements. Internal; slots remain
    /// pending rather than surfacing this.
    #[error("resources unavailable: {0}")]
    Resource(String),

    /// A cluster-manager RPC failed.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// A retryable I/O failure.
    #[error("transient error: {0}")]
    Transient(String),

    /// The app spec itself is invalid (zero instances, bad resources).
    #[error("invalid app spec: {0}")]
    InvalidSpec(String),
}

impl ManagerError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn app_not_found(app_id: &AppId) -> Self {
        Self::NotFound(format!("app '{app_id}'"))
    }

    pub fn task_not_found(task_id: &TaskId) -> Self {
        Self::NotFound(format!("task '{task_id}'"))
    }
}

/// Errors raised by a cluster-manager driver implementation.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver has no usable connection to the master.
    #[error("driver disconnected: {0}")]
    Disconnected(String),

    /// The master rejected the call.
    #[error("call rejected by master: {0}")]
    Rejected(String),

    /// A retryable transport failure.
    #[error("transient driver failure: {0}")]
    Transient(String),
}

impl DriverError {
    /// Whether the worker may retry the call on the current connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }
}
