// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! SSE framing shared by the worker task stream and codebase event stream
//! (spec §6.1, §6.2). Grounded on the retrieved pack's `mcp/router.rs`
//! `async_stream::stream! { yield Ok(Event::...) }` pattern.

use axum::response::sse::{Event, KeepAlive};
use std::convert::Infallible;
use std::time::Duration;
use taskforge_core::TaskEvent;

/// Keep-alive comment interval (spec §6.1 "Keep-alive comments every 15s").
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("keep-alive")
}

/// Frames a [`TaskEvent`] as an SSE `Event`: `event: <kind>\ndata: <json>\n\n`,
/// `id: <seq>` so `Last-Event-ID` resumption (spec §6.1) has something to
/// resume from.
pub fn frame(event: TaskEvent) -> Result<Event, Infallible> {
    let kind = event.kind.name();
    let id = event.id.to_string();
    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().event(kind).id(id).data(data))
}

/// The final event on a gracefully-closed stream (spec §7 "SSE streams
/// send a final `kind=end` event on graceful close").
pub fn end_event() -> Result<Event, Infallible> {
    Ok(Event::default().event("end").data("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskforge_core::EventKind;

    #[test]
    fn frame_succeeds_for_every_event_kind() {
        let event = TaskEvent { id: 7, task_id: None, codebase_id: "c1".into(), at: Utc::now(), kind: EventKind::Created };
        assert!(frame(event).is_ok());
        assert!(end_event().is_ok());
    }
}
