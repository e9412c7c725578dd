// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Lightweight in-process counters surfaced via `GET /healthz` (SPEC_FULL §6).
//!
//! Deliberately not a metrics-exporter integration (e.g. `prometheus`) — the
//! spec's Non-goals exclude external observability surfaces, but a resident
//! counter snapshot is the minimal ambient health signal a daemon like this
//! always carries.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    pub tasks_submitted: AtomicU64,
    pub tasks_claimed: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_cancelled: AtomicU64,
    pub tasks_reaped: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_claimed: self.tasks_claimed.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            tasks_reaped: self.tasks_reaped.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CountersSnapshot {
    pub tasks_submitted: u64,
    pub tasks_claimed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub tasks_reaped: u64,
    pub events_dropped: u64,
}
