//! Application, slot, and task state.
//!
//! Ownership is strictly hierarchical: the scheduler owns the application
//! registry, an application owns its slots, a slot owns its current task.
//! Back-references are avoided; everything reaches downward or looks up by
//! identifier.

mod app;
mod machine;
mod slot;
mod task;
mod version;

pub use app::App;
pub use machine::{can_transit, AppState};
pub use slot::{DesiredState, Slot, SlotObservation, SlotState};
pub use task::{Task, TaskStatus};
pub use version::{HealthCheck, PortMapping, Protocol, Version, VersionBuilder};
