//! Gateway error types.

use osprey_events::EventError;
use osprey_id::AppId;
use thiserror::Error;

/// Errors raised by the upstream registry.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Another application already routes under this alias.
    #[error("alias '{alias}' conflict: held by app '{held_by}'")]
    AliasConflict { alias: String, held_by: AppId },

    /// The target failed cross-field validation.
    #[error(transparent)]
    InvalidTarget(#[from] EventError),
}
