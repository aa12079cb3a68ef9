//! The scheduler: registry-owning core plus the driver-facing worker.
//!
//! The scheduler is responsible for:
//! - Matching resource offers against pending slot demand
//! - Launching tasks and fanning status callbacks out to slots
//! - Driving per-application state machines forward
//! - Maintaining the healthy-task event ring for catch-up subscribers
//! - Reconnecting to the cluster manager with bounded backoff

mod backoff;
mod core;
mod driver;
pub mod matcher;
mod worker;

pub use backoff::BackoffPolicy;
pub use core::{AppInfo, AppSpec, ClusterOp, SchedulerCore, SlotInfo};
pub use driver::{Driver, DriverEvent, LaunchSpec, StatusUpdate};
pub use worker::{Command, Scheduler, SchedulerHandle};
