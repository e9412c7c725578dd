// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Durable state backings for tasks, workers and codebases (spec §4.1).
//!
//! [`Store`] is the only shared mutable resource in the system; everything
//! above it (Scheduler, Lifecycle, Reaper) talks to it through this trait
//! and never mutates task or worker state directly.

pub mod memory;
#[cfg(feature = "sql")]
pub mod sql;
mod types;

pub use types::*;

use async_trait::async_trait;
use taskforge_core::{CoreError, Task, TaskId, TaskStatus, Worker, WorkerId};

/// Durable CRUD with the atomic transitions required by the task and
/// worker invariants (spec §3, §4.1). Each method is a single transaction.
#[async_trait]
pub trait Store: Send + Sync {
    /// Creates a task. If `idempotency_key` is `Some` and already maps to a
    /// live task in `scope`, returns the existing task instead
    /// (`CoreError::Duplicate` is not raised here — the existing task is
    /// returned so Lifecycle can treat both paths uniformly).
    async fn create_task(
        &self,
        task: Task,
        idempotency_key: Option<(&str, &str)>,
    ) -> Result<CreatedTask, CoreError>;

    async fn get_task(&self, id: &TaskId) -> Result<Task, CoreError>;

    async fn list_tasks(&self, filter: TaskFilter) -> Result<TaskPage, CoreError>;

    /// Atomically transitions a pending task to `claimed` for `worker_id`.
    /// At most one concurrent caller succeeds for a given task id.
    async fn claim_task(
        &self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        claim_deadline: chrono::DateTime<chrono::Utc>,
    ) -> Result<ClaimedTask, CoreError>;

    /// Moves a claimed/running task to a terminal status, verifying the
    /// presented `claim_token` still matches.
    async fn release(
        &self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        claim_token: &str,
        outcome: ReleaseOutcome,
    ) -> Result<Task, CoreError>;

    /// Extends a claim's deadline, verifying `claim_token`.
    async fn heartbeat(
        &self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        claim_token: &str,
        new_deadline: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), CoreError>;

    /// Appends a streaming output delta and marks the task `running` on
    /// first output, verifying `claim_token`.
    async fn append_output(
        &self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        claim_token: &str,
        delta: &str,
    ) -> Result<(), CoreError>;

    async fn cancel(&self, task_id: &TaskId) -> Result<Task, CoreError>;

    /// Tasks whose `claim_deadline < now`, for the Reaper (spec §4.6).
    async fn reap_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<ReapCandidate>, CoreError>;

    async fn upsert_worker(&self, worker: Worker) -> Result<Worker, CoreError>;

    async fn touch_worker(&self, worker_id: &WorkerId, now: chrono::DateTime<chrono::Utc>) -> Result<(), CoreError>;

    async fn mark_disconnected(&self, worker_id: &WorkerId) -> Result<(), CoreError>;

    async fn get_worker(&self, worker_id: &WorkerId) -> Result<Worker, CoreError>;

    /// Workers eligible to receive `task` (spec §3 Worker invariants, §4.4).
    async fn list_eligible_workers(
        &self,
        codebase_id: &str,
        model: Option<&str>,
        liveness_window: chrono::Duration,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Worker>, CoreError>;

    /// Workers whose liveness window has lapsed but who still hold claims
    /// (spec §4.6 step 3).
    async fn list_stale_live_workers(
        &self,
        liveness_window: chrono::Duration,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Worker>, CoreError>;

    async fn get_codebase(&self, id: &str) -> Result<Option<taskforge_core::Codebase>, CoreError>;

    async fn upsert_codebase(&self, codebase: taskforge_core::Codebase) -> Result<taskforge_core::Codebase, CoreError>;

    /// Pending tasks eligible for `worker_id`, used on `TaskStream` connect
    /// (spec §4.4 step 2), ordered `(priority DESC, created_at ASC)`.
    async fn list_pending_for_worker(&self, codebases: &[String], model: Option<&str>) -> Result<Vec<Task>, CoreError>;

    /// Reaper step 2: increments `attempts`; if still under `max_attempts`
    /// returns the task to `pending` (nulling `worker_id`/`claim_token`),
    /// otherwise fails it with `worker_lost` (spec §4.6).
    async fn requeue_or_fail(&self, task_id: &TaskId, max_attempts: u32) -> Result<Task, CoreError>;

    /// Reaper step 3: forcibly expires every claim held by `worker_id` by
    /// setting `claim_deadline = now`, so the next reaper pass re-queues
    /// them (spec §4.6 step 3).
    async fn force_expire_claims(&self, worker_id: &WorkerId, now: chrono::DateTime<chrono::Utc>) -> Result<(), CoreError>;

    /// Outbox entries written by transactions of a SQL-backed store that
    /// haven't yet been fan-out onto the in-process `EventBus` (SPEC_FULL
    /// §4, Outbox dispatcher). Backings without a durable outbox — the
    /// in-memory store publishes directly and needs no relay — return an
    /// empty page.
    async fn fetch_undelivered_outbox(&self, limit: i64) -> Result<Vec<taskforge_core::OutboxEvent>, CoreError> {
        let _ = limit;
        Ok(Vec::new())
    }

    /// Marks the given outbox rows delivered after the dispatcher has
    /// published them. No-op for backings that don't implement an outbox.
    async fn mark_outbox_delivered(&self, ids: &[i64]) -> Result<(), CoreError> {
        let _ = ids;
        Ok(())
    }
}

pub(crate) fn expect_status(task: &Task, expected: &[TaskStatus]) -> Result<(), CoreError> {
    if expected.contains(&task.status) {
        Ok(())
    } else if task.status.is_terminal() {
        Err(CoreError::AlreadyTerminal)
    } else {
        Err(CoreError::NotPending)
    }
}
