// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Codebase identifier and record (spec §3 "Codebase").

use serde::{Deserialize, Serialize};

/// Status of a codebase routing bucket.
///
/// Not named by the distilled spec's Codebase attributes, but referenced as
/// `status` — added so an operator can stop routing new work to a codebase
/// (`draining`) while in-flight tasks finish, without deleting the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodebaseStatus {
    Active,
    Draining,
    Retired,
}

crate::simple_display! {
    CodebaseStatus {
        Active => "active",
        Draining => "draining",
        Retired => "retired",
    }
}

/// A named routing bucket that determines which pool of workers is
/// eligible to execute a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebase {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub status: CodebaseStatus,
}

impl Codebase {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        let id = id.into();
        Self { name: name.into(), path: path.into(), worker_id: None, status: CodebaseStatus::Active, id }
    }
}
