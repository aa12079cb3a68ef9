//! # osprey-gateway
//!
//! The L7 routing plane of the osprey platform.
//!
//! The gateway consumes target-change events from the scheduler and keeps a
//! live map from application identity to healthy task endpoints:
//! - [`upstream`] — the registry of per-application upstreams with
//!   alias-unique virtual hosts
//! - [`balancer`] — pluggable load balancing (weight-proportional default)
//! - [`session`] — IP-affinity sessions with TTL and background sweep
//! - [`proxy`] — the HTTP reverse proxy classifying requests by Host header
//! - [`sync`] — the event consumer (manager SSE feed or in-process bus)

pub mod balancer;
pub mod config;
pub mod error;
pub mod proxy;
pub mod session;
pub mod sync;
pub mod upstream;

pub use balancer::{Balancer, RoundRobinBalancer, WeightBalancer};
pub use config::Config;
pub use error::GatewayError;
pub use upstream::UpstreamRegistry;
