// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Single-process in-memory [`crate::Store`] backing.
//!
//! Follows the teacher's `MaterializedState` discipline: one mutex guards
//! the whole state map, every operation takes the lock once and does its
//! work synchronously inside it. That single-writer property is what makes
//! `claim_task` race-free without a mutex-per-task-id (spec §4.1).

use crate::{
    expect_status, ClaimedTask, Cursor, CreatedTask, ReapCandidate, ReleaseOutcome, Store, TaskFilter, TaskPage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nanoid::nanoid;
use parking_lot::Mutex;
use std::collections::HashMap;
use taskforge_core::{Codebase, CoreError, Task, TaskId, TaskStatus, Worker, WorkerId};

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, Task>,
    workers: HashMap<WorkerId, Worker>,
    codebases: HashMap<String, Codebase>,
    /// `(scope, key) -> task_id`, spec §4.5 idempotency.
    idempotency: HashMap<(String, String), TaskId>,
}

/// In-memory [`Store`] backing, suitable for a single-process deployment or
/// tests.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_task(&self, task: Task, idempotency_key: Option<(&str, &str)>) -> Result<CreatedTask, CoreError> {
        let mut state = self.state.lock();
        if let Some((scope, key)) = idempotency_key {
            let map_key = (scope.to_string(), key.to_string());
            if let Some(existing_id) = state.idempotency.get(&map_key).cloned() {
                let existing =
                    state.tasks.get(&existing_id).cloned().ok_or_else(|| CoreError::Internal("dangling idempotency record".into()))?;
                return Ok(CreatedTask { task: existing, inserted: false });
            }
            state.idempotency.insert(map_key, task.id);
        }
        state.tasks.insert(task.id, task.clone());
        Ok(CreatedTask { task, inserted: true })
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task, CoreError> {
        self.state.lock().tasks.get(id).cloned().ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<TaskPage, CoreError> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.codebase_id.as_deref().is_none_or(|c| t.codebase_id == c))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)).then(a.id.to_string().cmp(&b.id.to_string())));

        if let Some(cursor) = &filter.cursor {
            tasks.retain(|t| {
                let key = (t.priority, t.created_at, t.id.to_string());
                let cursor_key = (cursor.priority, cursor.created_at, cursor.id.clone());
                // Strictly after the cursor in (priority DESC, created_at ASC, id ASC) order.
                (key.0, std::cmp::Reverse(key.1.clone()), key.2.clone()) < (cursor_key.0, std::cmp::Reverse(cursor_key.1.clone()), cursor_key.2.clone())
                    || (key.0 == cursor_key.0 && key.1 == cursor_key.1 && key.2 > cursor_key.2)
            });
        }

        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let next_cursor = if tasks.len() > limit { tasks.get(limit - 1).map(Cursor::after) } else { None };
        tasks.truncate(limit);
        Ok(TaskPage { tasks, next_cursor })
    }

    async fn claim_task(&self, task_id: &TaskId, worker_id: &WorkerId, claim_deadline: DateTime<Utc>) -> Result<ClaimedTask, CoreError> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(task_id).ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        expect_status(task, &[TaskStatus::Pending])?;
        let token = nanoid!(24);
        task.status = TaskStatus::Claimed;
        task.worker_id = Some(worker_id.to_string());
        task.claim_token = Some(token.clone());
        task.claim_deadline = Some(claim_deadline);
        task.updated_at = Utc::now();
        let claimed = task.clone();
        if let Some(w) = state.workers.get_mut(worker_id) {
            w.active_claims += 1;
        }
        Ok(ClaimedTask { task: claimed, claim_token: token })
    }

    async fn release(&self, task_id: &TaskId, worker_id: &WorkerId, claim_token: &str, outcome: ReleaseOutcome) -> Result<Task, CoreError> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(task_id).ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        verify_claim(task, worker_id, claim_token)?;
        let target = outcome.target_status();
        if !task.status.can_transition_to(target) {
            return Err(CoreError::InvalidTransition { from: task.status.to_string(), to: target.to_string() });
        }
        match outcome {
            ReleaseOutcome::Completed { result } => task.result = result,
            ReleaseOutcome::Failed { error } => {
                task.error = error;
                task.metadata.insert("failure_cause".into(), serde_json::json!("reported"));
            }
            ReleaseOutcome::Cancelled => {}
        }
        task.status = target;
        task.claim_token = None;
        task.claim_deadline = None;
        task.updated_at = Utc::now();
        task.completed_at = Some(task.updated_at);
        if let Some(w) = state.workers.get_mut(worker_id) {
            w.active_claims = w.active_claims.saturating_sub(1);
        }
        Ok(task.clone())
    }

    async fn heartbeat(&self, task_id: &TaskId, worker_id: &WorkerId, claim_token: &str, new_deadline: DateTime<Utc>) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(task_id).ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        verify_claim(task, worker_id, claim_token)?;
        task.claim_deadline = Some(new_deadline);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn append_output(&self, task_id: &TaskId, worker_id: &WorkerId, claim_token: &str, delta: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(task_id).ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        verify_claim(task, worker_id, claim_token)?;
        if task.status == TaskStatus::Claimed {
            task.status = TaskStatus::Running;
        }
        task.output.push_str(delta);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn cancel(&self, task_id: &TaskId) -> Result<Task, CoreError> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(task_id).ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        if task.status.is_terminal() {
            return Err(CoreError::AlreadyTerminal);
        }
        task.status = TaskStatus::Cancelled;
        task.claim_token = None;
        task.claim_deadline = None;
        task.updated_at = Utc::now();
        task.completed_at = Some(task.updated_at);
        Ok(task.clone())
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<ReapCandidate>, CoreError> {
        let state = self.state.lock();
        Ok(state
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Claimed | TaskStatus::Running))
            .filter(|t| t.claim_deadline.is_some_and(|d| d < now))
            .map(|t| ReapCandidate { task_id: t.id, prior_worker: t.worker_id.as_deref().map(WorkerId::new) })
            .collect())
    }

    async fn upsert_worker(&self, worker: Worker) -> Result<Worker, CoreError> {
        let mut state = self.state.lock();
        state.workers.insert(worker.id.clone(), worker.clone());
        Ok(worker)
    }

    async fn touch_worker(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        let worker = state.workers.get_mut(worker_id).ok_or_else(|| CoreError::NotFound(worker_id.to_string()))?;
        worker.last_seen_at = now;
        Ok(())
    }

    async fn mark_disconnected(&self, worker_id: &WorkerId) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        let worker = state.workers.get_mut(worker_id).ok_or_else(|| CoreError::NotFound(worker_id.to_string()))?;
        worker.connection_id = None;
        Ok(())
    }

    async fn get_worker(&self, worker_id: &WorkerId) -> Result<Worker, CoreError> {
        self.state.lock().workers.get(worker_id).cloned().ok_or_else(|| CoreError::NotFound(worker_id.to_string()))
    }

    async fn list_eligible_workers(
        &self,
        codebase_id: &str,
        model: Option<&str>,
        liveness_window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Worker>, CoreError> {
        let state = self.state.lock();
        Ok(state
            .workers
            .values()
            .filter(|w| w.is_live(now, liveness_window))
            .filter(|w| w.serves_codebase(codebase_id))
            .filter(|w| w.supports_model(model))
            .cloned()
            .collect())
    }

    async fn list_stale_live_workers(&self, liveness_window: chrono::Duration, now: DateTime<Utc>) -> Result<Vec<Worker>, CoreError> {
        let state = self.state.lock();
        Ok(state.workers.values().filter(|w| !w.is_live(now, liveness_window) && w.active_claims > 0).cloned().collect())
    }

    async fn get_codebase(&self, id: &str) -> Result<Option<Codebase>, CoreError> {
        Ok(self.state.lock().codebases.get(id).cloned())
    }

    async fn upsert_codebase(&self, codebase: Codebase) -> Result<Codebase, CoreError> {
        let mut state = self.state.lock();
        state.codebases.insert(codebase.id.clone(), codebase.clone());
        Ok(codebase)
    }

    async fn list_pending_for_worker(&self, codebases: &[String], model: Option<&str>) -> Result<Vec<Task>, CoreError> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| codebases.iter().any(|c| c == &t.codebase_id) || (t.codebase_id == taskforge_core::GLOBAL_CODEBASE && codebases.iter().any(|c| c == taskforge_core::GLOBAL_CODEBASE)))
            .filter(|t| model.is_none_or(|m| t.model.as_deref().is_none_or(|tm| tm == m)))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(tasks)
    }

    async fn requeue_or_fail(&self, task_id: &TaskId, max_attempts: u32) -> Result<Task, CoreError> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(task_id).ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        task.attempts += 1;
        if let Some(worker_id) = task.worker_id.clone() {
            if let Some(w) = state.workers.get_mut(worker_id.as_str()) {
                w.active_claims = w.active_claims.saturating_sub(1);
            }
        }
        if task.attempts < max_attempts {
            task.status = TaskStatus::Pending;
            task.worker_id = None;
            task.claim_token = None;
            task.claim_deadline = None;
        } else {
            task.status = TaskStatus::Failed;
            task.error = "worker_lost".into();
            task.metadata.insert("failure_cause".into(), serde_json::json!("worker_lost"));
            task.completed_at = Some(Utc::now());
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn force_expire_claims(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        for task in state.tasks.values_mut() {
            if task.worker_id.as_deref() == Some(worker_id.as_str()) && matches!(task.status, TaskStatus::Claimed | TaskStatus::Running) {
                task.claim_deadline = Some(now);
            }
        }
        Ok(())
    }
}

fn verify_claim(task: &Task, worker_id: &WorkerId, claim_token: &str) -> Result<(), CoreError> {
    if task.status.is_terminal() {
        return Err(CoreError::AlreadyTerminal);
    }
    let worker_matches = task.worker_id.as_deref() == Some(worker_id.as_str());
    let token_matches = task.claim_token.as_deref() == Some(claim_token);
    if !worker_matches || !token_matches {
        return Err(CoreError::StaleClaim);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new()
    }

    async fn seed_task(store: &MemoryStore) -> Task {
        let task = Task::builder().build();
        store.create_task(task, None).await.unwrap().task
    }

    #[tokio::test]
    async fn claim_then_release_completes() {
        let store = store();
        let task = seed_task(&store).await;
        let worker = WorkerId::new("w1");
        let claimed = store.claim_task(&task.id, &worker, Utc::now() + chrono::Duration::minutes(5)).await.unwrap();
        assert_eq!(claimed.task.status, TaskStatus::Claimed);

        let released = store
            .release(&task.id, &worker, &claimed.claim_token, ReleaseOutcome::Completed { result: "ok".into() })
            .await
            .unwrap();
        assert_eq!(released.status, TaskStatus::Completed);
        assert_eq!(released.result, "ok");
    }

    #[tokio::test]
    async fn double_claim_fails_second_caller() {
        let store = store();
        let task = seed_task(&store).await;
        let w1 = WorkerId::new("w1");
        let w2 = WorkerId::new("w2");
        let deadline = Utc::now() + chrono::Duration::minutes(5);
        store.claim_task(&task.id, &w1, deadline).await.unwrap();
        let second = store.claim_task(&task.id, &w2, deadline).await;
        assert!(matches!(second, Err(CoreError::NotPending)));
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_stale() {
        let store = store();
        let task = seed_task(&store).await;
        let w1 = WorkerId::new("w1");
        store.claim_task(&task.id, &w1, Utc::now() + chrono::Duration::minutes(5)).await.unwrap();
        let result = store.release(&task.id, &w1, "wrong-token", ReleaseOutcome::Completed { result: String::new() }).await;
        assert!(matches!(result, Err(CoreError::StaleClaim)));
    }

    #[tokio::test]
    async fn idempotent_create_returns_existing_task() {
        let store = store();
        let task1 = Task::builder().title("first").build();
        let created1 = store.create_task(task1, Some(("scope1", "key1"))).await.unwrap();
        assert!(created1.inserted);

        let task2 = Task::builder().title("second").build();
        let created2 = store.create_task(task2, Some(("scope1", "key1"))).await.unwrap();
        assert!(!created2.inserted);
        assert_eq!(created1.task.id, created2.task.id);
        assert_eq!(created2.task.title, "first");
    }

    #[tokio::test]
    async fn reap_expired_finds_overdue_claims() {
        let store = store();
        let task = seed_task(&store).await;
        let worker = WorkerId::new("w1");
        store.claim_task(&task.id, &worker, Utc::now() - chrono::Duration::minutes(1)).await.unwrap();
        let candidates = store.reap_expired(Utc::now()).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].task_id, task.id);
    }

    #[tokio::test]
    async fn list_tasks_orders_by_priority_then_age() {
        let store = store();
        let low = Task::builder().priority(0).build();
        let high = Task::builder().priority(10).build();
        store.create_task(low.clone(), None).await.unwrap();
        store.create_task(high.clone(), None).await.unwrap();

        let page = store.list_tasks(TaskFilter { limit: 10, ..Default::default() }).await.unwrap();
        assert_eq!(page.tasks[0].id, high.id);
        assert_eq!(page.tasks[1].id, low.id);
    }

    #[tokio::test]
    async fn requeue_or_fail_returns_to_pending_until_max_attempts() {
        let store = store();
        let task = seed_task(&store).await;
        let worker = WorkerId::new("w1");
        store.claim_task(&task.id, &worker, Utc::now() - chrono::Duration::minutes(1)).await.unwrap();

        let requeued = store.requeue_or_fail(&task.id, 3).await.unwrap();
        assert_eq!(requeued.status, TaskStatus::Pending);
        assert_eq!(requeued.attempts, 1);
        assert!(requeued.worker_id.is_none());
    }

    #[tokio::test]
    async fn requeue_or_fail_fails_after_max_attempts() {
        let store = store();
        let mut task = Task::builder().build();
        task.attempts = 2;
        store.create_task(task.clone(), None).await.unwrap();
        let worker = WorkerId::new("w1");
        store.claim_task(&task.id, &worker, Utc::now() - chrono::Duration::minutes(1)).await.unwrap();

        let failed = store.requeue_or_fail(&task.id, 3).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error, "worker_lost");
    }

    #[tokio::test]
    async fn force_expire_claims_sets_deadline_to_now() {
        let store = store();
        let task = seed_task(&store).await;
        let worker = WorkerId::new("w1");
        store.claim_task(&task.id, &worker, Utc::now() + chrono::Duration::minutes(5)).await.unwrap();

        store.force_expire_claims(&worker, Utc::now() - chrono::Duration::seconds(1)).await.unwrap();
        let candidates = store.reap_expired(Utc::now()).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn global_task_offered_only_to_workers_declaring_global() {
        let store = store();
        let task = Task::builder().codebase_id(taskforge_core::GLOBAL_CODEBASE).build();
        store.create_task(task.clone(), None).await.unwrap();

        let without_global = store.list_pending_for_worker(&["other".into()], None).await.unwrap();
        assert!(without_global.is_empty());

        let with_global = store.list_pending_for_worker(&[taskforge_core::GLOBAL_CODEBASE.into()], None).await.unwrap();
        assert_eq!(with_global.len(), 1);
    }
}
