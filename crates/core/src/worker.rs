// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Worker identifier and record (spec §3 "Worker").
//!
//! Unlike [`crate::task::TaskId`], a worker's id is supplied by the worker
//! itself on first contact, so it is a plain string newtype rather than a
//! server-generated [`crate::id::IdBuf`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;

/// Unique identifier for a worker instance, chosen by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for WorkerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A connected (or recently-connected) worker (spec §3 "Worker").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub codebases: HashSet<String>,
    pub models_supported: HashSet<String>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub active_claims: u32,
}

impl Worker {
    pub fn new(id: WorkerId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            codebases: HashSet::new(),
            models_supported: HashSet::new(),
            last_seen_at: now,
            connection_id: None,
            active_claims: 0,
        }
    }

    /// Whether the worker's heartbeat is within the liveness window
    /// (spec §3 Worker invariant (a), §4.3).
    pub fn is_live(&self, now: DateTime<Utc>, liveness_window: chrono::Duration) -> bool {
        now - self.last_seen_at < liveness_window
    }

    /// Serves the given codebase, either directly or via `global` (spec §3
    /// Worker invariant (b)).
    pub fn serves_codebase(&self, codebase_id: &str) -> bool {
        self.codebases.contains(codebase_id)
            || (codebase_id == crate::task::GLOBAL_CODEBASE
                && self.codebases.contains(crate::task::GLOBAL_CODEBASE))
    }

    /// Supports the given model, or no model was requested (spec §3 Worker
    /// invariant (c)).
    pub fn supports_model(&self, model: Option<&str>) -> bool {
        match model {
            Some(m) => self.models_supported.contains(m),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        let mut w = Worker::new(WorkerId::new("w1"), "worker-one", Utc::now());
        w.codebases.insert("c1".into());
        w
    }

    #[test]
    fn serves_direct_codebase() {
        assert!(worker().serves_codebase("c1"));
        assert!(!worker().serves_codebase("c2"));
    }

    #[test]
    fn global_task_requires_global_declared() {
        let w = worker();
        assert!(!w.serves_codebase(crate::task::GLOBAL_CODEBASE));
        let mut w2 = w.clone();
        w2.codebases.insert(crate::task::GLOBAL_CODEBASE.into());
        assert!(w2.serves_codebase(crate::task::GLOBAL_CODEBASE));
    }

    #[test]
    fn model_filter() {
        let mut w = worker();
        assert!(w.supports_model(None));
        assert!(!w.supports_model(Some("anthropic:claude-sonnet-4")));
        w.models_supported.insert("anthropic:claude-sonnet-4".into());
        assert!(w.supports_model(Some("anthropic:claude-sonnet-4")));
    }

    #[test]
    fn liveness_window() {
        let mut w = worker();
        let window = chrono::Duration::seconds(60);
        let now = w.last_seen_at + chrono::Duration::seconds(10);
        assert!(w.is_live(now, window));
        w.last_seen_at = now - chrono::Duration::seconds(120);
        assert!(!w.is_live(now, window));
    }
}
