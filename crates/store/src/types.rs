// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Request/response types for the [`crate::Store`] trait.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskforge_core::{CoreError, Task, TaskId, TaskStatus, WorkerId};

#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub task: Task,
    /// `true` if this call actually inserted a new row; `false` if an
    /// existing task was returned for a repeated idempotency key.
    pub inserted: bool,
}

#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: Task,
    pub claim_token: String,
}

/// Outcome reported by a worker releasing a claim (spec §4.1 `Release`).
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Completed { result: String },
    Failed { error: String },
    Cancelled,
}

impl ReleaseOutcome {
    pub fn target_status(&self) -> TaskStatus {
        match self {
            ReleaseOutcome::Completed { .. } => TaskStatus::Completed,
            ReleaseOutcome::Failed { .. } => TaskStatus::Failed,
            ReleaseOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// A task whose claim lease expired, for the Reaper (spec §4.6).
#[derive(Debug, Clone)]
pub struct ReapCandidate {
    pub task_id: TaskId,
    pub prior_worker: Option<WorkerId>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub codebase_id: Option<String>,
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub next_cursor: Option<Cursor>,
}

/// Opaque pagination cursor over `(priority DESC, created_at ASC, id ASC)`
/// ordering (spec §4.1 `ListTasks`, SPEC_FULL §4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, CoreError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| CoreError::InvalidArgument(format!("invalid cursor: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| CoreError::InvalidArgument(format!("invalid cursor: {e}")))
    }

    pub fn after(task: &Task) -> Self {
        Self { priority: task.priority, created_at: task.created_at, id: task.id.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = Cursor { priority: 5, created_at: Utc::now(), id: "task_abc".into() };
        let encoded = c.encode();
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(c, decoded);
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(Cursor::decode("not-valid-base64!!!").is_err());
    }
}
