//! HTTP surface of the manager.
//!
//! Only the event-subscription endpoint lives here; command transports are
//! external collaborators that talk to the scheduler through a
//! [`SchedulerHandle`].

mod events;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use osprey_events::EventBus;

use crate::scheduler::SchedulerHandle;

/// Shared state for the API router.
#[derive(Clone)]
pub struct ApiState {
    pub bus: Arc<EventBus>,
    pub scheduler: SchedulerHandle,
}

/// Builds the manager's HTTP router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/events", get(events::stream_events))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
