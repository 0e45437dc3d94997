//! Server-Sent Events (SSE) for session progress streaming

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Optional filter for GET /events
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only stream events of this session
    pub session_id: Option<Uuid>,
}

/// GET /events - SSE stream of rectification events
///
/// Streams SessionCreated, AnalysisStarted, TechniqueDegraded,
/// AnalysisCompleted, QuestionsIssued, SessionCompleted and
/// SessionTerminated, optionally filtered by `?session_id=`.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(session_filter = ?filter.session_id, "New SSE client connected");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                // Heartbeat every 15 seconds
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    let event = match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "SSE: Client lagging, events dropped");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if filter.session_id.is_some_and(|id| id != event.session_id()) {
                        continue;
                    }

                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            debug!("SSE: Broadcasting event: {}", event_type);
                            yield Ok(Event::default().event(event_type).data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
