// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Idempotency record (spec §3 "IdempotencyRecord", §4.5).

use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maps a `(submitter_scope, key)` pair to the task it created, so retried
/// submissions within the TTL return the original task unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub submitter_scope: String,
    pub task_id: TaskId,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.created_at >= ttl
    }
}
