// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Worker-facing endpoints: task stream, claim, release, status, output,
//! codebase capability updates (spec §6.1 "Worker-facing").

use crate::api::sse::{end_event, keep_alive};
use crate::error::{claim_conflict_response, ApiError};
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::convert::Infallible;
use taskforge_core::{EventKind, TaskId, WorkerId};
use taskforge_store::ReleaseOutcome;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn csv_set(raw: Option<&str>) -> HashSet<String> {
    raw.map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()).unwrap_or_default()
}

/// `GET /v1/worker/tasks/stream` — registers the worker, then streams
/// eligible pending tasks as they're offered (spec §4.4 `TaskStream`).
pub async fn task_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, ApiError> {
    let worker_id = header_str(&headers, "X-Worker-ID")
        .ok_or_else(|| taskforge_core::CoreError::InvalidArgument("missing X-Worker-ID".into()))?
        .to_string();
    let name = header_str(&headers, "X-Agent-Name").unwrap_or(&worker_id).to_string();
    let codebases = csv_set(header_str(&headers, "X-Codebases"));
    let models = csv_set(header_str(&headers, "X-Models"));

    state
        .registry
        .register(WorkerId::new(worker_id), name, codebases.clone(), models.clone(), None)
        .await?;

    let model = models.into_iter().next();
    let codebases_vec: Vec<String> = codebases.into_iter().collect();
    let task_stream = state.scheduler.task_stream(codebases_vec, model);
    let mut shutdown = state.shutdown.subscribe();

    let sse_stream = async_stream::stream! {
        tokio::pin!(task_stream);
        loop {
            tokio::select! {
                next = task_stream.next() => {
                    match next {
                        Some(task) => {
                            let data = serde_json::to_string(&task).unwrap_or_else(|_| "{}".to_string());
                            yield Ok(axum::response::sse::Event::default().event("task").data(data));
                        }
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    yield end_event();
                    break;
                }
            }
        }
    };

    Ok(Sse::new(sse_stream).keep_alive(keep_alive()))
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub task_id: String,
}

#[derive(Serialize)]
pub struct ClaimResponse {
    pub claim_token: String,
    pub claim_deadline: chrono::DateTime<Utc>,
}

pub async fn claim_task(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<ClaimRequest>) -> Response {
    let Some(worker_id) = header_str(&headers, "X-Worker-ID") else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let worker_id = WorkerId::new(worker_id);
    let task_id = TaskId::from_string(&req.task_id);

    match state.scheduler.claim(&worker_id, &task_id).await {
        Ok((claim_token, claim_deadline)) => Json(ClaimResponse { claim_token, claim_deadline }).into_response(),
        Err(e) if e.is_claim_conflict() => claim_conflict_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReleaseBody {
    Completed { result: String },
    Failed { error: String },
    Cancelled,
}

#[derive(Deserialize)]
pub struct ReleaseRequest {
    pub task_id: String,
    pub claim_token: String,
    #[serde(flatten)]
    pub outcome: ReleaseBody,
}

pub async fn release_task(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<ReleaseRequest>) -> Response {
    let Some(worker_id) = header_str(&headers, "X-Worker-ID") else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let worker_id = WorkerId::new(worker_id);
    let task_id = TaskId::from_string(&req.task_id);
    let outcome = match req.outcome {
        ReleaseBody::Completed { result } => ReleaseOutcome::Completed { result },
        ReleaseBody::Failed { error } => ReleaseOutcome::Failed { error },
        ReleaseBody::Cancelled => ReleaseOutcome::Cancelled,
    };

    match state.scheduler.release(&worker_id, &task_id, &req.claim_token, outcome).await {
        Ok(_task) => StatusCode::OK.into_response(),
        Err(e) if matches!(e, taskforge_core::CoreError::StaleClaim) => claim_conflict_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
    pub claim_token: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// `PUT /v1/worker/tasks/{task_id}/status` — signals `running` and pushes
/// an implicit heartbeat by extending `claim_deadline` (spec §6.1).
pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<StatusCode, ApiError> {
    let worker_id = header_str(&headers, "X-Worker-ID")
        .ok_or_else(|| taskforge_core::CoreError::Unauthenticated)?;
    let worker_id = WorkerId::new(worker_id);
    let task_id = TaskId::from_string(&task_id);
    let deadline = Utc::now() + state.registry.liveness_window();

    state.store.heartbeat(&task_id, &worker_id, &req.claim_token, deadline).await?;
    let task = state.store.get_task(&task_id).await?;
    state.bus.publish(
        &format!("task:{task_id}"),
        &task.codebase_id,
        Some(task_id),
        EventKind::Status { status: req.status },
    );
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct OutputRequest {
    pub delta: String,
}

/// `POST /v1/worker/tasks/{task_id}/output` — appends a streaming delta
/// and publishes `task.output` (spec §6.1, §4.2).
pub async fn append_output(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(req): Json<OutputRequest>,
) -> Result<StatusCode, ApiError> {
    let worker_id = header_str(&headers, "X-Worker-ID")
        .ok_or_else(|| taskforge_core::CoreError::Unauthenticated)?;
    let worker_id = WorkerId::new(worker_id);
    let task_id = TaskId::from_string(&task_id);
    let claim_token = header_str(&headers, "X-Claim-Token")
        .ok_or_else(|| taskforge_core::CoreError::InvalidArgument("missing X-Claim-Token".into()))?;

    state.store.append_output(&task_id, &worker_id, claim_token, &req.delta).await?;
    let task = state.store.get_task(&task_id).await?;
    state.bus.publish(
        &format!("task:{task_id}"),
        &task.codebase_id,
        Some(task_id),
        EventKind::Output { delta: req.delta.clone() },
    );
    state.bus.publish(
        &format!("codebase:{}", task.codebase_id),
        &task.codebase_id,
        Some(task_id),
        EventKind::Output { delta: req.delta },
    );
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct CodebasesRequest {
    pub codebases: Vec<String>,
}

/// `PUT /v1/worker/codebases` — idempotent capability update (spec §6.1).
pub async fn update_codebases(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CodebasesRequest>,
) -> Result<StatusCode, ApiError> {
    let worker_id = header_str(&headers, "X-Worker-ID")
        .ok_or_else(|| taskforge_core::CoreError::Unauthenticated)?;
    let worker_id = WorkerId::new(worker_id);
    state.registry.set_codebases(&worker_id, req.codebases.into_iter().collect()).await?;
    Ok(StatusCode::OK)
}
