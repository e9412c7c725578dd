// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Top-level wiring: owns Store, EventBus, WorkerRegistry, Scheduler,
//! Lifecycle, Reaper and the webhook dispatcher (spec §9 Design Notes).
//!
//! `AppState` is the axum-shared handle, grounded on the retrieved pack's
//! `trace-query-service::AppState` (a small `Clone` struct of `Arc`s handed
//! to every handler via `State`).

use crate::api::auth::Identity;
use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::outbox::OutboxDispatcher;
use crate::reaper::Reaper;
use crate::registry::WorkerRegistry;
use crate::scheduler::Scheduler;
use crate::webhook::WebhookDispatcher;
use std::sync::Arc;
use taskforge_core::{Counters, CoreError};
use taskforge_eventbus::EventBus;
use taskforge_store::memory::MemoryStore;
#[cfg(feature = "sql")]
use taskforge_store::sql::PgStore;
use taskforge_store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<WorkerRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub lifecycle: Arc<Lifecycle>,
    pub counters: Arc<Counters>,
    pub identity: Identity,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Fires once when the process starts draining, so open SSE streams can
    /// emit a final `kind=end` event instead of dropping silently (spec §7).
    pub shutdown: tokio::sync::broadcast::Sender<()>,
    /// Configured bind address, echoed back in the agent card's `url` field.
    pub listen_addr: String,
}

pub struct Server {
    state: AppState,
    reaper: Arc<Reaper>,
    outbox: Arc<OutboxDispatcher>,
    config: Config,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, CoreError> {
        let store: Arc<dyn Store> = match config.store.backing.as_str() {
            "memory" => Arc::new(MemoryStore::new()),
            "sql" => {
                #[cfg(feature = "sql")]
                {
                    let dsn = config
                        .store
                        .dsn
                        .as_deref()
                        .ok_or_else(|| CoreError::InvalidArgument("store.dsn required for sql backing".into()))?;
                    let pg = PgStore::connect(dsn).await?;
                    pg.migrate().await?;
                    Arc::new(pg)
                }
                #[cfg(not(feature = "sql"))]
                {
                    return Err(CoreError::Internal("sql backing requested but `sql` feature is disabled".into()));
                }
            }
            other => return Err(CoreError::InvalidArgument(format!("unknown store.backing: {other}"))),
        };

        let bus = Arc::new(EventBus::new(config.event_buffer));
        let counters = Arc::new(Counters::default());
        let registry = Arc::new(WorkerRegistry::new(store.clone(), config.liveness_window()));
        let lifecycle = Arc::new(Lifecycle::new(store.clone(), bus.clone(), counters.clone(), config.codebase_auto_register));

        let http_client = reqwest::Client::new();
        let (webhooks, webhook_worker) = WebhookDispatcher::spawn(http_client, config.webhook_max_age());
        let webhooks = Arc::new(webhooks);
        tokio::spawn(webhook_worker);

        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), webhooks, counters.clone(), config.claim_lease()));

        let reaper = Arc::new(Reaper::new(
            store.clone(),
            bus.clone(),
            scheduler.clone(),
            counters.clone(),
            config.reap_interval(),
            config.max_attempts,
            config.liveness_window(),
        ));

        let outbox = Arc::new(OutboxDispatcher::new(store.clone(), bus.clone(), config.reap_interval()));

        let (shutdown, _) = tokio::sync::broadcast::channel(1);
        let state = AppState {
            store,
            bus,
            registry,
            scheduler,
            lifecycle,
            counters,
            identity: Identity::allow_all(),
            started_at: chrono::Utc::now(),
            shutdown,
            listen_addr: config.listen_addr.clone(),
        };

        Ok(Self { state, reaper, outbox, config })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Binds the HTTP listener, runs the reaper loop alongside it, and
    /// shuts down gracefully on SIGINT/SIGTERM (spec §5 Cancellation:
    /// "treats OS interrupt as a request to stop accepting new work, drain
    /// in-flight HTTP responses for a bounded period"). No teacher file
    /// covers OS-level shutdown signals (`engine::runtime::signal` turned
    /// out to be about in-process agent-completion signals); this uses the
    /// standard `tokio::signal` idiom directly.
    pub async fn run(self) -> Result<(), CoreError> {
        let app = crate::api::router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| CoreError::Unavailable(format!("bind {}: {e}", self.config.listen_addr)))?;
        let local_addr = listener.local_addr().map_err(|e| CoreError::Internal(e.to_string()))?;
        tracing::info!(addr = %local_addr, "taskforged listening");

        let reaper = self.reaper.clone();
        let reaper_handle = tokio::spawn(async move { reaper.run().await });

        let outbox = self.outbox.clone();
        let outbox_handle = tokio::spawn(async move { outbox.run().await });

        let drain_timeout = self.config.drain_timeout();
        let shutdown_tx = self.state.shutdown.clone();
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_tx));
        let result = match tokio::time::timeout(drain_timeout + std::time::Duration::from_secs(1), serve).await {
            Ok(r) => r.map_err(|e| CoreError::Internal(format!("serve: {e}"))),
            Err(_) => {
                tracing::warn!("drain_timeout elapsed before all connections closed");
                Ok(())
            }
        };
        reaper_handle.abort();
        outbox_handle.abort();
        result
    }
}

async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(());
}
