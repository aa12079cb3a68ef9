//! Application state machine: states and the legal-transition table.
//!
//! The table is data, not code; the per-state progression logic lives in the
//! scheduler core, which serialises all registry mutation.

use serde::{Deserialize, Serialize};

/// States of the per-application controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Creating,
    Normal,
    ScaleUp,
    ScaleDown,
    Updating,
    CancelUpdate,
    Deleting,
}

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::Creating => "creating",
            AppState::Normal => "normal",
            AppState::ScaleUp => "scale_up",
            AppState::ScaleDown => "scale_down",
            AppState::Updating => "updating",
            AppState::CancelUpdate => "cancel_update",
            AppState::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legal transitions. Everything absent from this table is a conflict.
const TRANSITIONS: &[(AppState, &[AppState])] = &[
    (AppState::Creating, &[AppState::Normal, AppState::Deleting]),
    (
        AppState::Normal,
        &[
            AppState::ScaleUp,
            AppState::ScaleDown,
            AppState::Updating,
            AppState::Deleting,
        ],
    ),
    (AppState::ScaleUp, &[AppState::Normal, AppState::Deleting]),
    (AppState::ScaleDown, &[AppState::Normal, AppState::Deleting]),
    (
        AppState::Updating,
        &[AppState::Normal, AppState::CancelUpdate, AppState::Deleting],
    ),
    (
        AppState::CancelUpdate,
        &[AppState::Normal, AppState::Deleting],
    ),
    (AppState::Deleting, &[]),
];

/// True when the table admits `from → to`.
pub fn can_transit(from: AppState, to: AppState) -> bool {
    TRANSITIONS
        .iter()
        .find(|(state, _)| *state == from)
        .is_some_and(|(_, targets)| targets.contains(&to))
}
