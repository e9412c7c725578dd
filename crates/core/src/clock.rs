// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Clock abstraction for testable time handling, ported from the teacher's
//! `core::clock`. The server components call `chrono::Utc::now()` directly
//! rather than threading a generic `Clock` through every constructor —
//! `Clock`'s `Clone` supertrait makes it non-object-safe, so using it from
//! `Scheduler`/`Reaper`/`Lifecycle` (which hold `Arc<dyn Store>`, not a
//! generic parameter) would require making all of them generic. Tests
//! instead control time directly by constructing explicit past/future
//! offsets (see `reaper.rs`'s tests), which is simpler here. `Clock` itself
//! stays available for call sites that do want determinism.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A clock that provides the current wall-clock time.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for testing with controllable, monotonically-advanced time.
#[derive(Clone)]
pub struct FakeClock {
    millis: Arc<AtomicI64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { millis: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())) }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: chrono::Duration) {
        self.millis.fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_monotonically() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        clock.advance(chrono::Duration::seconds(30));
        let t1 = clock.now();
        assert_eq!((t1 - t0).num_seconds(), 30);
    }
}
