// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Periodic sweep guaranteeing bounded progress (spec §4.6).
//!
//! Runs every `reap_interval` and performs the three steps spec §4.6 lists:
//! requeue-or-fail expired claims, then force-expire claims held by workers
//! past their liveness window. Logging style follows the retrieved pack's
//! `lifecycle/reconcile.rs` (counts logged once per pass, not per row).

use crate::scheduler::Scheduler;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use taskforge_core::{Counters, EventKind};
use taskforge_eventbus::EventBus;
use taskforge_store::Store;
use tracing::{info, warn};

pub struct Reaper {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    counters: Arc<Counters>,
    interval: std::time::Duration,
    max_attempts: u32,
    liveness_window: chrono::Duration,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        scheduler: Arc<Scheduler>,
        counters: Arc<Counters>,
        interval: std::time::Duration,
        max_attempts: u32,
        liveness_window: chrono::Duration,
    ) -> Self {
        Self { store, bus, scheduler, counters, interval, max_attempts, liveness_window }
    }

    /// Runs the sweep loop until the returned future is dropped (i.e. the
    /// caller's `tokio::select!` picks a shutdown branch).
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// Runs a single pass; split out from `run` so tests can call it
    /// directly without waiting on the ticker.
    pub async fn sweep(&self) {
        let now = Utc::now();

        let expired = match self.store.reap_expired(now).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "reaper: failed to load expired claims");
                return;
            }
        };

        let mut requeued = 0u32;
        let mut failed = 0u32;
        for candidate in &expired {
            match self.store.requeue_or_fail(&candidate.task_id, self.max_attempts).await {
                Ok(task) if task.status == taskforge_core::TaskStatus::Pending => {
                    requeued += 1;
                    self.counters.tasks_reaped.fetch_add(1, Ordering::Relaxed);
                    self.bus.publish(
                        &format!("task:{}", task.id),
                        &task.codebase_id,
                        Some(task.id),
                        EventKind::Status { status: task.status.to_string() },
                    );
                    self.bus.publish(
                        &format!("codebase:{}", task.codebase_id),
                        &task.codebase_id,
                        Some(task.id),
                        EventKind::Status { status: task.status.to_string() },
                    );
                    self.scheduler.announce_pending(&task);
                }
                Ok(task) => {
                    failed += 1;
                    self.counters.tasks_reaped.fetch_add(1, Ordering::Relaxed);
                    self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
                    self.bus.publish(
                        &format!("task:{}", task.id),
                        &task.codebase_id,
                        Some(task.id),
                        EventKind::Failed { error: task.error.clone() },
                    );
                    self.bus.publish(
                        &format!("codebase:{}", task.codebase_id),
                        &task.codebase_id,
                        Some(task.id),
                        EventKind::Failed { error: task.error.clone() },
                    );
                }
                Err(e) => {
                    warn!(task_id = %candidate.task_id, error = %e, "reaper: requeue_or_fail failed");
                }
            }
        }
        if requeued > 0 || failed > 0 {
            info!(requeued, failed, "reaper: swept expired claims");
        }

        let stale_workers = match self.store.list_stale_live_workers(self.liveness_window, now).await {
            Ok(workers) => workers,
            Err(e) => {
                warn!(error = %e, "reaper: failed to load stale workers");
                return;
            }
        };

        let mut expired_count = 0u32;
        for worker in &stale_workers {
            if let Err(e) = self.store.force_expire_claims(&worker.id, now).await {
                warn!(worker_id = %worker.id, error = %e, "reaper: force_expire_claims failed");
                continue;
            }
            expired_count += 1;
        }
        if expired_count > 0 {
            info!(workers = expired_count, "reaper: force-expired claims for stale workers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::WebhookDispatcher;
    use taskforge_core::{TaskStatus, Worker, WorkerId};
    use taskforge_store::memory::MemoryStore;

    fn reaper(max_attempts: u32) -> (Reaper, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new(64));
        let webhooks = Arc::new(WebhookDispatcher::new_disabled());
        let counters = Arc::new(Counters::default());
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), webhooks, counters.clone(), chrono::Duration::minutes(5)));
        let reaper = Reaper::new(
            store.clone(),
            bus,
            scheduler,
            counters,
            std::time::Duration::from_secs(30),
            max_attempts,
            chrono::Duration::seconds(60),
        );
        (reaper, store)
    }

    #[tokio::test]
    async fn sweep_requeues_expired_claim_under_max_attempts() {
        let (reaper, store) = reaper(3);
        let task = taskforge_core::Task::builder().build();
        store.create_task(task.clone(), None).await.unwrap();
        let worker_id = WorkerId::new("w1");
        store.claim_task(&task.id, &worker_id, Utc::now() - chrono::Duration::seconds(1)).await.unwrap();

        reaper.sweep().await;

        let reloaded = store.get_task(&task.id).await.unwrap();
        assert_eq!(reloaded.status, TaskStatus::Pending);
        assert_eq!(reloaded.attempts, 1);
    }

    #[tokio::test]
    async fn sweep_fails_task_after_max_attempts_exhausted() {
        let (reaper, store) = reaper(1);
        let task = taskforge_core::Task::builder().build();
        store.create_task(task.clone(), None).await.unwrap();
        let worker_id = WorkerId::new("w1");
        store.claim_task(&task.id, &worker_id, Utc::now() - chrono::Duration::seconds(1)).await.unwrap();

        reaper.sweep().await;

        let reloaded = store.get_task(&task.id).await.unwrap();
        assert_eq!(reloaded.status, TaskStatus::Failed);
        assert_eq!(reloaded.error, "worker_lost");
    }

    #[tokio::test]
    async fn sweep_force_expires_claims_of_stale_workers() {
        let (reaper, store) = reaper(3);
        let task = taskforge_core::Task::builder().build();
        store.create_task(task.clone(), None).await.unwrap();
        let worker_id = WorkerId::new("w1");
        store.claim_task(&task.id, &worker_id, Utc::now() + chrono::Duration::minutes(5)).await.unwrap();
        let mut worker = Worker::new(worker_id.clone(), "w1", Utc::now() - chrono::Duration::seconds(120));
        worker.active_claims = 1;
        store.upsert_worker(worker).await.unwrap();

        reaper.sweep().await;

        let reloaded = store.get_task(&task.id).await.unwrap();
        assert!(reloaded.claim_deadline.unwrap() <= Utc::now());
    }
}
