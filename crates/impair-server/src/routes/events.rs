use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    /// Only forward events of this sequence.
    pub sequence: Option<String>,
}

/// GET /api/events: SSE stream of `step` and `completed` events.
///
/// Events missed while the client lagged are skipped, not replayed.
pub async fn sse_events(
    State(app): State<AppState>,
    Query(params): Query<EventsParams>,
) -> impl axum::response::IntoResponse {
    let only = params.sequence.filter(|s| !s.trim().is_empty());
    let rx = app.orchestrator.events().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| {
        let event = msg.ok()?;
        if only.as_deref().is_some_and(|id| id != event.sequence_id()) {
            return None;
        }
        Event::default()
            .event(event.name())
            .json_data(&event)
            .ok()
            .map(Ok::<Event, Infallible>)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
