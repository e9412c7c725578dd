// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! `GET /.well-known/agent-card.json` — static discovery document (spec
//! §6.1).

use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct AgentCard {
    pub name: &'static str,
    pub version: &'static str,
    pub url: String,
    pub capabilities: Capabilities,
    pub skills: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub push_notifications: bool,
}

pub async fn agent_card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(AgentCard {
        name: "taskforged",
        version: env!("CARGO_PKG_VERSION"),
        url: format!("http://{}", state.listen_addr),
        capabilities: Capabilities { streaming: true, push_notifications: true },
        skills: vec!["task.submit", "task.claim", "task.stream", "codebase.events"],
    })
}
