// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Task submission and read endpoints (spec §6.1 "Task submission and read").

use crate::api::auth::{Bearer, PolicyRequest};
use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use taskforge_core::{CoreError, Task, TaskId, TaskStatus, TaskSubmission};
use taskforge_store::{Cursor, TaskFilter};

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Serialize)]
pub struct CreatedTaskResponse {
    pub task_id: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn submit_task(
    State(state): State<AppState>,
    bearer: Bearer,
    headers: HeaderMap,
    Json(submission): Json<TaskSubmission>,
) -> Result<(StatusCode, Json<CreatedTaskResponse>), ApiError> {
    let principal = state.identity.verifier.verify(&bearer.0).await?;
    state
        .identity
        .policy
        .authorize(PolicyRequest { principal: &principal, action: "tasks.submit", resource: &submission.codebase_id })
        .await?;

    let idempotency_key = headers.get(IDEMPOTENCY_KEY_HEADER).and_then(|v| v.to_str().ok());
    let idempotency = idempotency_key.map(|key| (principal.principal_id.as_str(), key));

    let (task, inserted) = state.lifecycle.submit(submission, idempotency).await?;
    let status = if inserted { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(CreatedTaskResponse { task_id: task.id.to_string(), status: task.status.to_string(), created_at: task.created_at })))
}

pub async fn get_task(State(state): State<AppState>, bearer: Bearer, Path(task_id): Path<String>) -> Result<Json<Task>, ApiError> {
    let principal = state.identity.verifier.verify(&bearer.0).await?;
    let task = state.store.get_task(&TaskId::from_string(&task_id)).await?;
    state
        .identity
        .policy
        .authorize(PolicyRequest { principal: &principal, action: "tasks.read", resource: &task.codebase_id })
        .await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub codebase_id: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct TaskPageResponse {
    pub tasks: Vec<Task>,
    pub next_cursor: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    bearer: Bearer,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskPageResponse>, ApiError> {
    state.identity.verifier.verify(&bearer.0).await?;

    let status = query
        .status
        .map(|s| parse_status(&s))
        .transpose()?;
    let cursor = query.cursor.map(|c| Cursor::decode(&c)).transpose()?;

    let filter = TaskFilter { status, codebase_id: query.codebase_id, limit: query.limit.unwrap_or(50).min(200), cursor };
    let page = state.store.list_tasks(filter).await?;
    Ok(Json(TaskPageResponse { tasks: page.tasks, next_cursor: page.next_cursor.map(|c| c.encode()) }))
}

pub async fn cancel_task(State(state): State<AppState>, bearer: Bearer, Path(task_id): Path<String>) -> Result<Json<Task>, ApiError> {
    let principal = state.identity.verifier.verify(&bearer.0).await?;
    let task_id = TaskId::from_string(&task_id);
    let existing = state.store.get_task(&task_id).await?;
    state
        .identity
        .policy
        .authorize(PolicyRequest { principal: &principal, action: "tasks.cancel", resource: &existing.codebase_id })
        .await?;
    let task = state.lifecycle.cancel(&task_id).await?;
    Ok(Json(task))
}

fn parse_status(raw: &str) -> Result<TaskStatus, CoreError> {
    match raw {
        "pending" => Ok(TaskStatus::Pending),
        "claimed" => Ok(TaskStatus::Claimed),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(CoreError::InvalidArgument(format!("unknown status: {other}"))),
    }
}
