//! # osprey-events
//!
//! Event type definitions and the in-process event bus for the osprey
//! platform.
//!
//! ## Design Principles
//!
//! - Events are immutable records of observed state transitions
//! - Every event is attributable to exactly one application
//! - Delivery is best-effort: a slow listener loses events, it never
//!   backpressures the publisher
//!
//! ## Event Types
//!
//! - Target changes (`target.add`, `target.update`, `target.delete`) — the
//!   routing plane's feed
//! - Task lifecycle (`task.*`) — slot-level observations surfaced to
//!   subscribers
//! - Application state transitions (`app.state_changed`)
//!
//! ## Event Bus
//!
//! [`EventBus`] fans events out to uuid-identified listeners, each with an
//! optional per-application filter and a bounded buffer. A process-global
//! bus can be installed with [`bus::init`] and torn down with
//! [`bus::shutdown`]; components that need isolation (tests) construct their
//! own instance instead.

pub mod bus;
mod error;
mod types;

pub use bus::{EventBus, Subscription};
pub use error::EventError;
pub use types::*;
