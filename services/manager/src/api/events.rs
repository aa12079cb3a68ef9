//! Server-Sent-Events subscription endpoint.
//!
//! `GET /events?appId=<id>&catchUp=<bool>` streams task-level events. With
//! `catchUp=true` the healthy-task ring for the requested scope is replayed
//! before live delivery. The listener is attached to the bus *before* the
//! ring is read, so events occurring during subscription setup land in the
//! listener buffer instead of being lost; a subscriber may therefore see an
//! event twice, but never misses one.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use osprey_events::Event;
use osprey_id::AppId;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::ApiState;

/// Query parameters for event subscription.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Restrict the stream to one application; empty means all.
    #[serde(rename = "appId")]
    pub app_id: Option<String>,
    /// Replay the healthy-task ring before live events.
    #[serde(rename = "catchUp")]
    pub catch_up: Option<bool>,
}

pub async fn stream_events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, (StatusCode, String)> {
    let filter: Option<AppId> = match query.app_id.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse()
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid appId: {e}")))?,
        ),
        None => None,
    };
    let catch_up = query.catch_up.unwrap_or(false);

    // Attach before replaying so nothing published during setup is lost.
    let subscription = state.bus.subscribe(filter.clone());
    debug!(listener = %subscription.id, ?filter, catch_up, "event subscriber attached");

    let history = if catch_up {
        state
            .scheduler
            .healthy_history(filter)
            .await
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let replay = stream::iter(history).map(|event| Ok(render(&event)));
    let live = ReceiverStream::new(subscription.rx).map(|event| Ok(render(&event)));

    Ok(Sse::new(replay.chain(live)).keep_alive(KeepAlive::default()))
}

fn render(event: &Event) -> SseEvent {
    let sse = SseEvent::default().event(event.kind());
    match serde_json::to_string(event) {
        Ok(json) => sse.data(json),
        Err(_) => sse.data("{}"),
    }
}
