// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Event types published on the EventBus (spec §4.2, §6.2).
//!
//! Serializes with `{"kind": "task.created", ...fields}` so SSE frames carry
//! the envelope fields required by spec §6.2 directly.

use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event published onto a `task:{id}` or `codebase:{id}` topic.
///
/// Carries the envelope fields required by spec §6.2 (`id`, `kind`,
/// `task_id`, `codebase_id`, `at`) plus kind-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Monotonic per-topic sequence number, assigned by the EventBus.
    pub id: u64,
    /// Absent only for bus-level `dropped`/`end` events, which are not
    /// about any single task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub codebase_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Kind-specific payload for a [`TaskEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventKind {
    #[serde(rename = "task.created")]
    Created,

    #[serde(rename = "task.claimed")]
    Claimed { worker_id: String },

    #[serde(rename = "task.status")]
    Status { status: String },

    #[serde(rename = "task.output")]
    Output { delta: String },

    #[serde(rename = "task.completed")]
    Completed { result: String },

    #[serde(rename = "task.failed")]
    Failed { error: String },

    #[serde(rename = "task.cancelled")]
    Cancelled,

    /// Sent to a resuming subscriber when the EventBus dropped events for
    /// their subscription (spec §7 "EventBus `dropped_events`...").
    #[serde(rename = "dropped")]
    Dropped { count: u64 },

    /// Final event on a gracefully-closed SSE stream (spec §7).
    #[serde(rename = "end")]
    End,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Created => "task.created",
            EventKind::Claimed { .. } => "task.claimed",
            EventKind::Status { .. } => "task.status",
            EventKind::Output { .. } => "task.output",
            EventKind::Completed { .. } => "task.completed",
            EventKind::Failed { .. } => "task.failed",
            EventKind::Cancelled => "task.cancelled",
            EventKind::Dropped { .. } => "dropped",
            EventKind::End => "end",
        }
    }
}
