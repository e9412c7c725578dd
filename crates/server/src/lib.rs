// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Coordination server binding the HTTP/JSON + SSE surface (spec §6) to
//! Store, EventBus, WorkerRegistry, Scheduler, Lifecycle, Reaper and the
//! outbox dispatcher. Split into a library and a thin `main.rs` binary the
//! way the retrieved pack's `trace-query-service` does, so integration
//! tests can drive the router in-process with `tower::ServiceExt::oneshot`
//! instead of spawning a real listener.

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod outbox;
pub mod reaper;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod webhook;

pub use api::router;
pub use config::Config;
pub use server::{AppState, Server};
