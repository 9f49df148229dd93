//! SSE push channel
//!
//! Bridges the registry's broadcast bus onto a Server-Sent Events
//! response. Slow consumers lag the bounded channel and lose the oldest
//! events; they never back-pressure the supervisors.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::web::AppState;

pub async fn events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("GET /api/events: subscriber connected");
    let receiver = state.registry.subscribe();

    let stream = BroadcastStream::new(receiver).filter_map(|message| async move {
        match message {
            Ok(event) => serde_json::to_string(&event)
                .ok()
                .map(|json| Ok(Event::default().data(json))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!("SSE subscriber lagged; dropped {skipped} event(s)");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
