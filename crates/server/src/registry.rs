// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Worker liveness and capability tracking (spec §4.3).
//!
//! Thin wrapper over [`Store`] — the registry holds no state of its own;
//! "liveness" is a pure function of `now - last_seen_at`, recomputed on
//! every read rather than tracked as a state transition (spec §4.3: "there
//! is no state transition event").

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use taskforge_core::{CoreError, Worker, WorkerId};
use taskforge_store::Store;

pub struct WorkerRegistry {
    store: Arc<dyn Store>,
    liveness_window: chrono::Duration,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn Store>, liveness_window: chrono::Duration) -> Self {
        Self { store, liveness_window }
    }

    pub async fn register(
        &self,
        worker_id: WorkerId,
        name: String,
        codebases: HashSet<String>,
        models_supported: HashSet<String>,
        connection_id: Option<String>,
    ) -> Result<Worker, CoreError> {
        let now = Utc::now();
        let worker = match self.store.get_worker(&worker_id).await {
            Ok(mut existing) => {
                existing.name = name;
                existing.codebases = codebases;
                existing.models_supported = models_supported;
                existing.last_seen_at = now;
                existing.connection_id = connection_id;
                existing
            }
            Err(CoreError::NotFound(_)) => {
                let mut worker = Worker::new(worker_id, name, now);
                worker.codebases = codebases;
                worker.models_supported = models_supported;
                worker.connection_id = connection_id;
                worker
            }
            Err(e) => return Err(e),
        };
        self.store.upsert_worker(worker).await
    }

    pub async fn heartbeat(&self, worker_id: &WorkerId) -> Result<(), CoreError> {
        self.store.touch_worker(worker_id, Utc::now()).await
    }

    pub async fn set_codebases(&self, worker_id: &WorkerId, codebases: HashSet<String>) -> Result<Worker, CoreError> {
        let mut worker = self.store.get_worker(worker_id).await?;
        worker.codebases = codebases;
        self.store.upsert_worker(worker).await
    }

    pub async fn mark_disconnected(&self, worker_id: &WorkerId) -> Result<(), CoreError> {
        self.store.mark_disconnected(worker_id).await
    }

    /// Workers eligible for a task against `codebase_id`/`model` (spec §3
    /// Worker invariants, consumed by `Scheduler::Eligible`).
    pub async fn eligible(&self, codebase_id: &str, model: Option<&str>) -> Result<Vec<Worker>, CoreError> {
        self.store.list_eligible_workers(codebase_id, model, self.liveness_window, Utc::now()).await
    }

    pub fn liveness_window(&self) -> chrono::Duration {
        self.liveness_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_store::memory::MemoryStore;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Arc::new(MemoryStore::new()), chrono::Duration::seconds(60))
    }

    #[tokio::test]
    async fn register_then_heartbeat_keeps_worker_live() {
        let reg = registry();
        let id = WorkerId::new("w1");
        reg.register(id.clone(), "worker-one".into(), HashSet::from(["c1".into()]), HashSet::new(), None).await.unwrap();
        let eligible = reg.eligible("c1", None).await.unwrap();
        assert_eq!(eligible.len(), 1);
        reg.heartbeat(&id).await.unwrap();
    }

    #[tokio::test]
    async fn set_codebases_updates_eligibility() {
        let reg = registry();
        let id = WorkerId::new("w1");
        reg.register(id.clone(), "worker-one".into(), HashSet::new(), HashSet::new(), None).await.unwrap();
        assert!(reg.eligible("c1", None).await.unwrap().is_empty());
        reg.set_codebases(&id, HashSet::from(["c1".into()])).await.unwrap();
        assert_eq!(reg.eligible("c1", None).await.unwrap().len(), 1);
    }
}
