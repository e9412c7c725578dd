// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! HTTP surface (spec §6.1): router assembly plus the ambient `/healthz`
//! and `/v1/version` endpoints SPEC_FULL adds for operability. Grounded on
//! the retrieved pack's `trace-query-service::router` (`Router::new()`
//! chained with `.route(...)`, `.with_state(state)`).

pub mod agent_card;
pub mod auth;
pub mod codebases;
pub mod sse;
pub mod tasks;
pub mod worker;

use crate::server::AppState;
use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/version", get(version))
        .route("/.well-known/agent-card.json", get(agent_card::agent_card))
        .route("/v1/tasks", post(tasks::submit_task).get(tasks::list_tasks))
        .route("/v1/tasks/:task_id", get(tasks::get_task).delete(tasks::cancel_task))
        .route("/v1/worker/tasks/stream", get(worker::task_stream))
        .route("/v1/worker/tasks/claim", post(worker::claim_task))
        .route("/v1/worker/tasks/release", post(worker::release_task))
        .route("/v1/worker/tasks/:task_id/status", put(worker::update_status))
        .route("/v1/worker/tasks/:task_id/output", post(worker::append_output))
        .route("/v1/worker/codebases", put(worker::update_codebases))
        .route("/v1/codebases/:codebase_id/events", get(codebases::codebase_events))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: i64,
    counters: taskforge_core::CountersSnapshot,
}

/// `GET /healthz` — liveness plus a counters snapshot (SPEC_FULL §6).
async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0);
    Json(HealthResponse { status: "ok", uptime_secs, counters: state.counters.snapshot() })
}

/// `GET /v1/version` — build metadata (SPEC_FULL §6).
async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
