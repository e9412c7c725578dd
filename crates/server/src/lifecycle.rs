// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Admission validation, transition enforcement, idempotency recording and
//! event emission (spec §4.5).

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use taskforge_core::{Counters, CoreError, Task, TaskId, TaskSubmission};
use taskforge_eventbus::EventBus;
use taskforge_store::{CreatedTask, Store};

pub struct Lifecycle {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    counters: Arc<Counters>,
    codebase_auto_register: bool,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>, counters: Arc<Counters>, codebase_auto_register: bool) -> Self {
        Self { store, bus, counters, codebase_auto_register }
    }

    /// Validates and admits a new task (spec §4.5 admission validation,
    /// idempotency).
    pub async fn submit(&self, submission: TaskSubmission, idempotency: Option<(&str, &str)>) -> Result<(Task, bool), CoreError> {
        let (agent_type, priority) = submission.validate()?;

        if submission.codebase_id != taskforge_core::GLOBAL_CODEBASE {
            match self.store.get_codebase(&submission.codebase_id).await? {
                Some(_) => {}
                None if self.codebase_auto_register => {
                    let codebase = taskforge_core::Codebase::new(
                        submission.codebase_id.clone(),
                        submission.codebase_id.clone(),
                        String::new(),
                    );
                    self.store.upsert_codebase(codebase).await?;
                }
                None => {
                    return Err(CoreError::InvalidArgument(format!(
                        "unknown codebase_id: {}",
                        submission.codebase_id
                    )))
                }
            }
        }

        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            codebase_id: submission.codebase_id,
            title: submission.title,
            description: submission.description,
            agent_type,
            model: submission.model,
            priority,
            status: taskforge_core::TaskStatus::Pending,
            worker_id: None,
            claim_token: None,
            claim_deadline: None,
            result: String::new(),
            error: String::new(),
            output: String::new(),
            metadata: submission.metadata,
            notify_email: submission.notify_email,
            webhook_url: submission.webhook_url,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            idempotency_key: idempotency.map(|(_, key)| key.to_string()),
        };

        let CreatedTask { task, inserted } = self.store.create_task(task, idempotency).await?;
        if inserted {
            self.counters.tasks_submitted.fetch_add(1, Ordering::Relaxed);
            self.bus.publish(&format!("task:{}", task.id), &task.codebase_id, Some(task.id), taskforge_core::EventKind::Created);
            self.bus.publish(&format!("codebase:{}", task.codebase_id), &task.codebase_id, Some(task.id), taskforge_core::EventKind::Created);
        }
        Ok((task, inserted))
    }

    pub async fn cancel(&self, task_id: &TaskId) -> Result<Task, CoreError> {
        let task = self.store.cancel(task_id).await?;
        self.counters.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
        self.emit_status(&task, taskforge_core::EventKind::Cancelled);
        Ok(task)
    }

    pub fn emit_status(&self, task: &Task, kind: taskforge_core::EventKind) {
        self.bus.publish(&format!("task:{}", task.id), &task.codebase_id, Some(task.id), kind.clone());
        self.bus.publish(&format!("codebase:{}", task.codebase_id), &task.codebase_id, Some(task.id), kind);
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_store::memory::MemoryStore;

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(Arc::new(MemoryStore::new()), Arc::new(EventBus::new(16)), Arc::new(Counters::default()), false)
    }

    fn submission() -> TaskSubmission {
        TaskSubmission {
            title: "t".into(),
            description: "a valid description".into(),
            codebase_id: taskforge_core::GLOBAL_CODEBASE.into(),
            agent_type: None,
            model: None,
            priority: None,
            metadata: Default::default(),
            notify_email: None,
            webhook_url: None,
        }
    }

    #[tokio::test]
    async fn submit_rejects_invalid_admission() {
        let lc = lifecycle();
        let mut sub = submission();
        sub.description = "short".into();
        assert!(lc.submit(sub, None).await.is_err());
    }

    #[tokio::test]
    async fn submit_rejects_unknown_codebase_without_auto_register() {
        let lc = lifecycle();
        let mut sub = submission();
        sub.codebase_id = "unregistered".into();
        let err = lc.submit(sub, None).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn submit_is_idempotent_per_key() {
        let lc = lifecycle();
        let (task1, inserted1) = lc.submit(submission(), Some(("scope", "key"))).await.unwrap();
        assert!(inserted1);
        let (task2, inserted2) = lc.submit(submission(), Some(("scope", "key"))).await.unwrap();
        assert!(!inserted2);
        assert_eq!(task1.id, task2.id);
    }

    #[tokio::test]
    async fn cancel_publishes_event_and_transitions() {
        let lc = lifecycle();
        let (task, _) = lc.submit(submission(), None).await.unwrap();
        let cancelled = lc.cancel(&task.id).await.unwrap();
        assert_eq!(cancelled.status, taskforge_core::TaskStatus::Cancelled);
    }
}
