// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Outbox entry (spec §3 "OutboxEvent", §4.2 outbox pattern).
//!
//! Used only by the SQL store backing: the transaction that mutates a task
//! also inserts an `OutboxEvent`; the server's outbox dispatcher drains it
//! into the in-memory EventBus and marks it delivered.

use crate::event::TaskEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub topic: String,
    pub payload: TaskEvent,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}
