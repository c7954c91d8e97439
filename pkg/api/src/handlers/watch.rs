use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    /// Resume point. Without it only live events are streamed.
    #[serde(default)]
    pub seq: Option<u64>,
}

/// GET /api/v1/watch — SSE endpoint streaming medium change events.
pub async fn watch_events(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let prefix = query.prefix.unwrap_or_default();

    info!("Watch subscription: prefix='{}', from_seq={:?}", prefix, query.seq);

    // Subscribe before snapshotting the buffer so nothing falls in between.
    let rx = state.shared.events().subscribe();
    let (buffered, last_buffered) = match query.seq {
        Some(from_seq) => match state.shared.events().replay_since(from_seq).await {
            Some(buffered) => {
                let last = buffered.last().map(|e| e.seq).unwrap_or(from_seq);
                (buffered, last)
            }
            None => {
                // The host restarted since the client last saw seq; its log began again at 0.
                warn!(
                    "Watch resume point {} is ahead of the event log, streaming live events",
                    from_seq
                );
                (Vec::new(), 0)
            }
        },
        None => (Vec::new(), 0),
    };

    let stream = BroadcastStream::new(rx);
    let prefix_clone = prefix.clone();

    // Create a combined stream: buffered events first, then live events
    let buffered_stream = tokio_stream::iter(
        buffered
            .into_iter()
            .filter(move |e| prefix.is_empty() || e.key.starts_with(&prefix))
            .map(|e| {
                let data = serde_json::to_string(&e).unwrap_or_default();
                Ok::<_, Infallible>(Event::default().data(data))
            }),
    );

    let live_stream = stream.filter_map(move |result| match result {
        Ok(event) => {
            // Skip what the buffered replay already sent
            if event.seq <= last_buffered {
                return None;
            }
            if prefix_clone.is_empty() || event.key.starts_with(&prefix_clone) {
                if let Ok(data) = serde_json::to_string(&event) {
                    return Some(Ok::<_, Infallible>(Event::default().data(data)));
                }
            }
            None
        }
        Err(_) => None,
    });

    let combined = buffered_stream.chain(live_stream);

    Sse::new(combined).keep_alive(KeepAlive::default())
}
