// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Matches pending tasks to live, eligible workers and serves the
//! per-worker task stream (spec §4.4).

use crate::webhook::WebhookDispatcher;
use async_stream::stream;
use chrono::Utc;
use futures_util::Stream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use taskforge_core::{Counters, CoreError, Task, TaskId, WorkerId};
use taskforge_eventbus::EventBus;
use taskforge_store::{ReleaseOutcome, Store};

pub struct Scheduler {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    webhooks: Arc<WebhookDispatcher>,
    counters: Arc<Counters>,
    claim_lease: chrono::Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        webhooks: Arc<WebhookDispatcher>,
        counters: Arc<Counters>,
        claim_lease: chrono::Duration,
    ) -> Self {
        Self { store, bus, webhooks, counters, claim_lease }
    }

    /// Opens a server-sent stream of `Task`s for `worker_id` (spec §4.4
    /// `TaskStream`): first the currently-pending eligible backlog, then a
    /// live subscription to newly submitted/re-queued tasks.
    pub fn task_stream(&self, codebases: Vec<String>, model: Option<String>) -> impl Stream<Item = Task> {
        let store = self.store.clone();
        let bus = self.bus.clone();
        stream! {
            if let Ok(backlog) = store.list_pending_for_worker(&codebases, model.as_deref()).await {
                for task in backlog {
                    yield task;
                }
            }

            let subscription = bus.subscribe("pending-tasks");
            loop {
                let event = subscription.recv().await;
                if let taskforge_core::EventKind::Created = event.kind {
                    if let Some(task_id) = event.task_id {
                        if let Ok(task) = store.get_task(&task_id).await {
                            if task.status == taskforge_core::TaskStatus::Pending
                                && eligible_for(&task, &codebases, model.as_deref())
                            {
                                yield task;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Notifies the scheduler's internal `pending-tasks` topic — called by
    /// Lifecycle/Reaper whenever a task becomes (re)claimable.
    pub fn announce_pending(&self, task: &Task) {
        self.bus.publish("pending-tasks", &task.codebase_id, Some(task.id), taskforge_core::EventKind::Created);
    }

    /// Returns the claim token and the effective `claim_deadline` (spec
    /// §6.1 `POST /v1/worker/tasks/claim` response body).
    pub async fn claim(&self, worker_id: &WorkerId, task_id: &TaskId) -> Result<(String, chrono::DateTime<Utc>), CoreError> {
        let deadline = Utc::now() + self.claim_lease;
        let claimed = self.store.claim_task(task_id, worker_id, deadline).await?;
        self.counters.tasks_claimed.fetch_add(1, Ordering::Relaxed);
        self.bus.publish(
            &format!("task:{task_id}"),
            &claimed.task.codebase_id,
            Some(*task_id),
            taskforge_core::EventKind::Claimed { worker_id: worker_id.to_string() },
        );
        self.bus.publish(
            &format!("codebase:{}", claimed.task.codebase_id),
            &claimed.task.codebase_id,
            Some(*task_id),
            taskforge_core::EventKind::Claimed { worker_id: worker_id.to_string() },
        );
        let effective_deadline = claimed.task.claim_deadline.unwrap_or(deadline);
        Ok((claimed.claim_token, effective_deadline))
    }

    pub async fn release(&self, worker_id: &WorkerId, task_id: &TaskId, claim_token: &str, outcome: ReleaseOutcome) -> Result<Task, CoreError> {
        let webhook_outcome = match &outcome {
            ReleaseOutcome::Completed { result } => WebhookOutcome::Completed(result.clone()),
            ReleaseOutcome::Failed { error } => WebhookOutcome::Failed(error.clone()),
            ReleaseOutcome::Cancelled => WebhookOutcome::Cancelled,
        };
        let task = self.store.release(task_id, worker_id, claim_token, outcome).await?;
        match &webhook_outcome {
            WebhookOutcome::Completed(_) => self.counters.tasks_completed.fetch_add(1, Ordering::Relaxed),
            WebhookOutcome::Failed(_) => self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed),
            WebhookOutcome::Cancelled => self.counters.tasks_cancelled.fetch_add(1, Ordering::Relaxed),
        };
        let kind = match webhook_outcome {
            WebhookOutcome::Completed(ref result) => taskforge_core::EventKind::Completed { result: result.clone() },
            WebhookOutcome::Failed(ref error) => taskforge_core::EventKind::Failed { error: error.clone() },
            WebhookOutcome::Cancelled => taskforge_core::EventKind::Cancelled,
        };
        self.bus.publish(&format!("task:{task_id}"), &task.codebase_id, Some(*task_id), kind.clone());
        self.bus.publish(&format!("codebase:{}", task.codebase_id), &task.codebase_id, Some(*task_id), kind);

        if let Some(webhook_url) = task.webhook_url.clone() {
            self.webhooks.schedule(webhook_url, task.clone());
        }
        Ok(task)
    }
}

enum WebhookOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

fn eligible_for(task: &Task, codebases: &[String], model: Option<&str>) -> bool {
    let codebase_match = codebases.iter().any(|c| c == &task.codebase_id)
        || (task.codebase_id == taskforge_core::GLOBAL_CODEBASE && codebases.iter().any(|c| c == taskforge_core::GLOBAL_CODEBASE));
    let model_match = match (&task.model, model) {
        (Some(requested), Some(declared)) => requested == declared,
        (Some(_), None) => false,
        (None, _) => true,
    };
    codebase_match && model_match
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use taskforge_store::memory::MemoryStore;

    fn scheduler() -> Scheduler {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new(64));
        let webhooks = Arc::new(WebhookDispatcher::new_disabled());
        Scheduler::new(store, bus, webhooks, Arc::new(Counters::default()), chrono::Duration::minutes(5))
    }

    #[tokio::test]
    async fn claim_emits_claimed_event() {
        let sched = scheduler();
        let task = taskforge_core::Task::builder().build();
        sched.store.create_task(task.clone(), None).await.unwrap();
        let worker = WorkerId::new("w1");
        let (token, _deadline) = sched.claim(&worker, &task.id).await.unwrap();
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn task_stream_yields_existing_backlog() {
        let sched = scheduler();
        let task = taskforge_core::Task::builder().codebase_id("c1").build();
        sched.store.create_task(task.clone(), None).await.unwrap();

        let stream = sched.task_stream(vec!["c1".into()], None);
        tokio::pin!(stream);
        let first = stream.next().await.unwrap();
        assert_eq!(first.id, task.id);
    }
}
