// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Outbox dispatcher (SPEC_FULL §4): for SQL-backed deployments, relays
//! durably-written [`OutboxEvent`]s onto the in-process `EventBus` so SSE
//! subscribers see them, then marks them delivered. A no-op poll loop when
//! the store doesn't implement an outbox (the in-memory backing publishes
//! directly and never accumulates undelivered rows). Polling cadence and
//! batch size follow the retrieved pack's `reconcile.rs` sweep-loop shape,
//! reused here rather than in the reaper because this loop's failure mode
//! (a relay falling behind) is unrelated to task-claim liveness.

use std::sync::Arc;
use std::time::Duration;
use taskforge_eventbus::EventBus;
use taskforge_store::Store;

const BATCH_SIZE: i64 = 100;

pub struct OutboxDispatcher {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    interval: Duration,
}

impl OutboxDispatcher {
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>, interval: Duration) -> Self {
        Self { store, bus, interval }
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.drain_once().await;
        }
    }

    /// Drains a single batch; split out so tests can call it without
    /// waiting on the ticker.
    pub async fn drain_once(&self) {
        let events = match self.store.fetch_undelivered_outbox(BATCH_SIZE).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "outbox dispatcher: failed to fetch undelivered events");
                return;
            }
        };
        if events.is_empty() {
            return;
        }

        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        for event in &events {
            self.bus.publish(&event.topic, &event.payload.codebase_id, event.payload.task_id, event.payload.kind.clone());
        }

        if let Err(e) = self.store.mark_outbox_delivered(&ids).await {
            tracing::warn!(error = %e, "outbox dispatcher: failed to mark events delivered");
            return;
        }
        tracing::debug!(count = ids.len(), "outbox dispatcher: relayed events");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_store::memory::MemoryStore;

    #[tokio::test]
    async fn drain_once_is_a_no_op_for_the_memory_backing() {
        // MemoryStore's default `fetch_undelivered_outbox` returns empty —
        // it publishes directly and keeps no outbox rows.
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new(16));
        let dispatcher = OutboxDispatcher::new(store, bus.clone(), Duration::from_millis(10));
        dispatcher.drain_once().await;
        assert_eq!(bus.subscriber_count("codebase:c1"), 0);
    }
}
