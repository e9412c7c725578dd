// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! In-memory topic broker with per-subscriber bounded buffering (spec §4.2).
//!
//! Topics are created implicitly on first publish/subscribe. Each
//! subscriber owns an independent ring buffer; when a buffer is full the
//! bus drops the oldest undelivered event and counts it, rather than
//! blocking the publisher or disconnecting the subscriber.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use taskforge_core::event::{EventKind, TaskEvent};

/// Default per-subscriber queue depth (spec §6.3 `event_buffer`).
pub const DEFAULT_CAPACITY: usize = 256;

struct SubscriberState {
    buf: Mutex<VecDeque<TaskEvent>>,
    dropped_since_last_recv: AtomicU64,
    notify: tokio::sync::Notify,
    capacity: usize,
}

impl SubscriberState {
    fn push(&self, event: TaskEvent) {
        let mut buf = self.buf.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped_since_last_recv.fetch_add(1, Ordering::SeqCst);
        }
        buf.push_back(event);
        drop(buf);
        self.notify.notify_one();
    }
}

struct TopicState {
    next_seq: u64,
    last_activity: DateTime<Utc>,
    subscribers: HashMap<u64, Arc<SubscriberState>>,
    next_sub_id: u64,
}

impl TopicState {
    fn new(now: DateTime<Utc>) -> Self {
        Self { next_seq: 1, last_activity: now, subscribers: HashMap::new(), next_sub_id: 1 }
    }
}

/// In-memory publish/subscribe broker keyed by topic string
/// (`task:{id}` / `codebase:{id}`, per spec §4.2).
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self { topics: Arc::new(Mutex::new(HashMap::new())), capacity }
    }

    /// Publish `kind` onto `topic`. Non-blocking: never waits on a slow
    /// subscriber.
    pub fn publish(&self, topic: &str, codebase_id: &str, task_id: Option<taskforge_core::TaskId>, kind: EventKind) {
        let now = Utc::now();
        let mut topics = self.topics.lock();
        let state = topics.entry(topic.to_string()).or_insert_with(|| TopicState::new(now));
        let seq = state.next_seq;
        state.next_seq += 1;
        state.last_activity = now;
        let event = TaskEvent { id: seq, task_id, codebase_id: codebase_id.to_string(), at: now, kind };
        for sub in state.subscribers.values() {
            sub.push(event.clone());
        }
    }

    /// Subscribe to `topic`, creating it if it doesn't exist yet. Returns a
    /// handle that can be polled with [`Subscription::recv`] and dropped to
    /// unsubscribe.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let now = Utc::now();
        let mut topics = self.topics.lock();
        let state = topics.entry(topic.to_string()).or_insert_with(|| TopicState::new(now));
        let sub_id = state.next_sub_id;
        state.next_sub_id += 1;
        let sub_state = Arc::new(SubscriberState {
            buf: Mutex::new(VecDeque::with_capacity(self.capacity.min(64))),
            dropped_since_last_recv: AtomicU64::new(0),
            notify: tokio::sync::Notify::new(),
            capacity: self.capacity,
        });
        state.subscribers.insert(sub_id, sub_state.clone());
        Subscription { topic: topic.to_string(), sub_id, state: sub_state, bus: self.clone() }
    }

    fn unsubscribe(&self, topic: &str, sub_id: u64) {
        let mut topics = self.topics.lock();
        if let Some(state) = topics.get_mut(topic) {
            state.subscribers.remove(&sub_id);
        }
    }

    /// Drop topics with no subscribers that haven't been published to in
    /// `grace` (spec §4.2 "reaped when no subscribers remain...").
    pub fn reap_idle_topics(&self, grace: chrono::Duration) {
        let now = Utc::now();
        let mut topics = self.topics.lock();
        topics.retain(|_, state| !state.subscribers.is_empty() || now - state.last_activity < grace);
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map(|s| s.subscribers.len()).unwrap_or(0)
    }
}

/// A live subscription to a topic. Unsubscribes (and frees its buffer) when
/// dropped.
pub struct Subscription {
    topic: String,
    sub_id: u64,
    state: Arc<SubscriberState>,
    bus: EventBus,
}

impl Subscription {
    /// Await the next event. If events were dropped since the last call,
    /// first yields a synthetic `dropped` event (spec §7), then resumes
    /// normal delivery.
    pub async fn recv(&self) -> TaskEvent {
        let dropped = self.state.dropped_since_last_recv.swap(0, Ordering::SeqCst);
        if dropped > 0 {
            return TaskEvent {
                id: 0,
                task_id: None,
                codebase_id: String::new(),
                at: Utc::now(),
                kind: EventKind::Dropped { count: dropped },
            };
        }
        loop {
            if let Some(event) = self.state.buf.lock().pop_front() {
                return event;
            }
            self.state.notify.notified().await;
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.topic, self.sub_id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> EventKind {
        kind
    }

    #[tokio::test]
    async fn subscriber_receives_own_copy_in_order() {
        let bus = EventBus::new(8);
        let sub_a = bus.subscribe("task:1");
        let sub_b = bus.subscribe("task:1");

        bus.publish("task:1", "c1", None, event(EventKind::Created));
        bus.publish("task:1", "c1", None, event(EventKind::Status { status: "claimed".into() }));

        let a1 = sub_a.recv().await;
        let a2 = sub_a.recv().await;
        assert_eq!(a1.kind.name(), "task.created");
        assert_eq!(a2.kind.name(), "task.status");

        let b1 = sub_b.recv().await;
        let b2 = sub_b.recv().await;
        assert_eq!(b1.kind.name(), "task.created");
        assert_eq!(b2.kind.name(), "task.status");
    }

    #[tokio::test]
    async fn slow_consumer_drops_oldest_and_reports_count() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe("codebase:c1");

        for i in 0..10 {
            bus.publish("codebase:c1", "c1", None, event(EventKind::Output { delta: i.to_string() }));
        }

        // First recv surfaces the drop count, not an event.
        let first = sub.recv().await;
        match first.kind {
            EventKind::Dropped { count } => assert_eq!(count, 6),
            other => panic!("expected dropped event, got {other:?}"),
        }

        // Remaining 4 buffered deltas are the most recent ones, in order.
        let mut deltas = Vec::new();
        for _ in 0..4 {
            if let EventKind::Output { delta } = sub.recv().await.kind {
                deltas.push(delta);
            }
        }
        assert_eq!(deltas, vec!["6", "7", "8", "9"]);
    }

    #[tokio::test]
    async fn slow_consumer_does_not_block_other_subscribers() {
        let bus = EventBus::new(2);
        let slow = bus.subscribe("task:1");
        let fast = bus.subscribe("task:1");

        for _ in 0..20 {
            bus.publish("task:1", "c1", None, event(EventKind::Output { delta: "x".into() }));
        }
        // The fast subscriber can still drain without waiting on `slow`.
        let _ = fast.recv().await;
        drop(slow);
    }

    #[tokio::test]
    async fn unsubscribe_on_drop() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count("t"), 0);
        let sub = bus.subscribe("t");
        assert_eq!(bus.subscriber_count("t"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn reap_idle_topics_removes_unsubscribed_stale_topics() {
        let bus = EventBus::new(8);
        bus.publish("stale", "c1", None, event(EventKind::Created));
        assert_eq!(bus.topic_count(), 1);
        bus.reap_idle_topics(chrono::Duration::seconds(-1));
        assert_eq!(bus.topic_count(), 0);
    }
}
