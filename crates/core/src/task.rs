// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Task identifier and state machine (spec §3).

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a task, server-generated on submission.
    pub struct TaskId("task_");
}

/// Reserved codebase id meaning "any worker that declares `global`".
pub const GLOBAL_CODEBASE: &str = "global";

/// Kind of agent work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Build,
    Plan,
    General,
    Explore,
}

impl std::str::FromStr for AgentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "plan" => Ok(Self::Plan),
            "general" => Ok(Self::General),
            "explore" => Ok(Self::Explore),
            other => Err(CoreError::InvalidArgument(format!("unknown agent_type: {other}"))),
        }
    }
}

crate::simple_display! {
    AgentType {
        Build => "build",
        Plan => "plan",
        General => "general",
        Explore => "explore",
    }
}

/// Lifecycle status of a task (spec §3, §4.4 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Whether `self -> next` is a legal transition per spec §3 invariant 2.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Pending, Cancelled)
                | (Claimed, Running)
                | (Claimed, Pending) // reaper/explicit release
                | (Claimed, Completed)
                | (Claimed, Failed)
                | (Claimed, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Pending) // lease expired, reaper re-queues
        )
    }
}

crate::simple_display! {
    TaskStatus {
        Pending => "pending",
        Claimed => "claimed",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Minimum/maximum admission bounds from spec §3/§4.5.
pub const TITLE_MAX_LEN: usize = 200;
pub const DESCRIPTION_MIN_LEN: usize = 10;
pub const DESCRIPTION_MAX_LEN: usize = 10_000;
pub const PRIORITY_MIN: i32 = 0;
pub const PRIORITY_MAX: i32 = 100;
pub const DEFAULT_PRIORITY: i32 = 0;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A unit of agent work (spec §3 "Task").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub codebase_id: String,
    pub title: String,
    pub description: String,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub priority: i32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Fields accepted on submission (spec §6.1 `POST /v1/tasks`).
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSubmission {
    pub title: String,
    pub description: String,
    pub codebase_id: String,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub notify_email: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl TaskSubmission {
    /// Validate admission bounds (spec §4.5). Returns the parsed `agent_type`
    /// and effective `priority` alongside the validation result.
    pub fn validate(&self) -> Result<(AgentType, i32), CoreError> {
        if self.title.chars().count() > TITLE_MAX_LEN {
            return Err(CoreError::InvalidArgument(format!(
                "title exceeds {TITLE_MAX_LEN} characters"
            )));
        }
        let desc_len = self.description.chars().count();
        if !(DESCRIPTION_MIN_LEN..=DESCRIPTION_MAX_LEN).contains(&desc_len) {
            return Err(CoreError::InvalidArgument(format!(
                "description must be {DESCRIPTION_MIN_LEN}-{DESCRIPTION_MAX_LEN} characters, got {desc_len}"
            )));
        }
        let agent_type = match &self.agent_type {
            Some(s) => s.parse()?,
            None => AgentType::General,
        };
        let priority = self.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(CoreError::InvalidArgument(format!(
                "priority must be {PRIORITY_MIN}-{PRIORITY_MAX}, got {priority}"
            )));
        }
        if self.codebase_id.trim().is_empty() {
            return Err(CoreError::InvalidArgument("codebase_id must not be empty".into()));
        }
        Ok((agent_type, priority))
    }
}

crate::builder! {
    pub struct TaskBuilder => Task {
        into {
            codebase_id: String = GLOBAL_CODEBASE,
            title: String = "test task",
            description: String = "a test task description",
            result: String = "",
            error: String = "",
            output: String = "",
        }
        set {
            agent_type: AgentType = AgentType::General,
            priority: i32 = DEFAULT_PRIORITY,
            status: TaskStatus = TaskStatus::Pending,
            metadata: HashMap<String, serde_json::Value> = HashMap::new(),
            attempts: u32 = 0,
        }
        option {
            model: String = None,
            worker_id: String = None,
            claim_token: String = None,
            notify_email: String = None,
            webhook_url: String = None,
            idempotency_key: String = None,
        }
        computed {
            id: TaskId = TaskId::new(),
            claim_deadline: Option<DateTime<Utc>> = None,
            created_at: DateTime<Utc> = Utc::now(),
            updated_at: DateTime<Utc> = Utc::now(),
            completed_at: Option<DateTime<Utc>> = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_match_state_machine() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Claimed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Claimed.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Claimed.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Claimed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn submission_rejects_bad_title() {
        let sub = TaskSubmission {
            title: "x".repeat(TITLE_MAX_LEN + 1),
            description: "valid description here".into(),
            codebase_id: "global".into(),
            agent_type: None,
            model: None,
            priority: None,
            metadata: HashMap::new(),
            notify_email: None,
            webhook_url: None,
        };
        assert!(matches!(sub.validate(), Err(CoreError::InvalidArgument(_))));
    }

    #[test]
    fn submission_rejects_short_description() {
        let sub = TaskSubmission {
            title: "t".into(),
            description: "short".into(),
            codebase_id: "global".into(),
            agent_type: None,
            model: None,
            priority: None,
            metadata: HashMap::new(),
            notify_email: None,
            webhook_url: None,
        };
        assert!(sub.validate().is_err());
    }

    #[test]
    fn submission_rejects_out_of_range_priority() {
        let sub = TaskSubmission {
            title: "t".into(),
            description: "a valid description".into(),
            codebase_id: "global".into(),
            agent_type: None,
            model: None,
            priority: Some(101),
            metadata: HashMap::new(),
            notify_email: None,
            webhook_url: None,
        };
        assert!(sub.validate().is_err());
    }

    #[test]
    fn submission_accepts_defaults() {
        let sub = TaskSubmission {
            title: "t".into(),
            description: "a valid description".into(),
            codebase_id: "global".into(),
            agent_type: None,
            model: None,
            priority: None,
            metadata: HashMap::new(),
            notify_email: None,
            webhook_url: None,
        };
        let (agent_type, priority) = sub.validate().unwrap();
        assert_eq!(agent_type, AgentType::General);
        assert_eq!(priority, DEFAULT_PRIORITY);
    }
}
