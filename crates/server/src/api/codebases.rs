// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Subscriber-facing codebase event stream (spec §6.1 "Subscriber-facing").

use crate::api::sse::{end_event, frame, keep_alive};
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::response::sse::Sse;
use futures_util::Stream;
use std::convert::Infallible;

/// `Last-Event-ID`, when present, is accepted but informational only: the
/// in-memory EventBus keeps no history before a subscriber connects (spec
/// §4.2 "Topics are created implicitly..."); durable replay is the outbox
/// dispatcher's job for SQL-backed deployments, not this stream.
pub struct LastEventId(pub Option<String>);

impl<S> axum::extract::FromRequestParts<S> for LastEventId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(LastEventId(parts.headers.get("Last-Event-ID").and_then(|v| v.to_str().ok()).map(String::from)))
    }
}

/// Streams every event published for `codebase_id` until the subscriber
/// disconnects or the server starts draining, in which case a final
/// `kind=end` frame is yielded before the stream closes (spec §7).
pub async fn codebase_events(
    State(state): State<AppState>,
    Path(codebase_id): Path<String>,
    _last_event_id: LastEventId,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let subscription = state.bus.subscribe(&format!("codebase:{codebase_id}"));
    let mut shutdown = state.shutdown.subscribe();
    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                event = subscription.recv() => yield frame(event),
                _ = shutdown.recv() => {
                    yield end_event();
                    break;
                }
            }
        }
    };
    Sse::new(stream).keep_alive(keep_alive())
}
