// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Binary entrypoint. `tracing_subscriber` init and top-level wiring follow
//! the retrieved pack's `trace-query-service::main` (`fmt().with_env_filter`
//! then bind-and-serve); exit codes follow spec §6.4.

use std::path::PathBuf;
use std::process::ExitCode;
use taskforged::{Config, Server};
use tracing_subscriber::EnvFilter;

const EXIT_CLEAN: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_STORE_INIT_FAILURE: u8 = 2;
const EXIT_RUNTIME_FAILURE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,taskforged=debug")))
        .init();

    let config_path = std::env::var("TASKFORGE_CONFIG").ok().map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let server = match Server::new(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize store");
            return ExitCode::from(EXIT_STORE_INIT_FAILURE);
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::from(EXIT_CLEAN),
        Err(e) => {
            tracing::error!(error = %e, "fatal runtime error");
            ExitCode::from(EXIT_RUNTIME_FAILURE)
        }
    }
}
