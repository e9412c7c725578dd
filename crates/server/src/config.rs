// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Layered configuration: built-in defaults, overridden by an optional
//! TOML file, overridden by environment variables (SPEC_FULL §2, spec
//! §6.3). Centralizes env-var access the way the teacher's `env.rs` does,
//! rather than scattering `std::env::var` calls through the codebase.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("parsing config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `"memory"` or `"sql"`.
    pub backing: String,
    pub dsn: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backing: "memory".into(), dsn: None }
    }
}

/// Resolved server configuration (spec §6.3 key list).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub store: StoreConfig,
    pub liveness_window_secs: u64,
    pub claim_lease_secs: u64,
    pub reap_interval_secs: u64,
    pub max_attempts: u32,
    pub event_buffer: usize,
    pub idempotency_ttl_secs: u64,
    pub webhook_max_age_secs: u64,
    pub codebase_auto_register: bool,
    pub drain_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            store: StoreConfig::default(),
            liveness_window_secs: 60,
            claim_lease_secs: 300,
            reap_interval_secs: 30,
            max_attempts: taskforge_core::DEFAULT_MAX_ATTEMPTS as u32,
            event_buffer: taskforge_eventbus::DEFAULT_CAPACITY,
            idempotency_ttl_secs: 24 * 3600,
            webhook_max_age_secs: 24 * 3600,
            codebase_auto_register: false,
            drain_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load defaults, then a config file (if `path` is given and exists),
    /// then environment variable overrides (`TASKFORGE_*`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read { path: path.display().to_string(), source: e })?;
                config = toml::from_str(&raw).map_err(|e| ConfigError::Parse { path: path.display().to_string(), source: e })?;
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("TASKFORGE_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Ok(v) = std::env::var("TASKFORGE_STORE_BACKING") {
            self.store.backing = v;
        }
        if let Ok(v) = std::env::var("TASKFORGE_STORE_DSN") {
            self.store.dsn = Some(v);
        }
        if let Some(v) = parse_env_u64("TASKFORGE_LIVENESS_WINDOW_SECS")? {
            self.liveness_window_secs = v;
        }
        if let Some(v) = parse_env_u64("TASKFORGE_CLAIM_LEASE_SECS")? {
            self.claim_lease_secs = v;
        }
        if let Some(v) = parse_env_u64("TASKFORGE_REAP_INTERVAL_SECS")? {
            self.reap_interval_secs = v;
        }
        if let Some(v) = parse_env_u64("TASKFORGE_MAX_ATTEMPTS")? {
            self.max_attempts = v as u32;
        }
        if let Some(v) = parse_env_u64("TASKFORGE_EVENT_BUFFER")? {
            self.event_buffer = v as usize;
        }
        if let Some(v) = parse_env_u64("TASKFORGE_IDEMPOTENCY_TTL_SECS")? {
            self.idempotency_ttl_secs = v;
        }
        if let Some(v) = parse_env_u64("TASKFORGE_WEBHOOK_MAX_AGE_SECS")? {
            self.webhook_max_age_secs = v;
        }
        if let Ok(v) = std::env::var("TASKFORGE_CODEBASE_AUTO_REGISTER") {
            self.codebase_auto_register = v == "1" || v.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    pub fn liveness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness_window_secs as i64)
    }

    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_lease_secs as i64)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn idempotency_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idempotency_ttl_secs as i64)
    }

    pub fn webhook_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.webhook_max_age_secs as i64)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn parse_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue { key: key.into(), reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.liveness_window_secs, 60);
        assert_eq!(c.claim_lease_secs, 300);
        assert_eq!(c.reap_interval_secs, 30);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.event_buffer, 256);
    }

    #[test]
    fn load_with_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/taskforge.toml"))).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn load_overlays_a_toml_file_on_top_of_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskforge.toml");
        std::fs::write(&path, "listen_addr = \"127.0.0.1:9090\"\nmax_attempts = 5\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9090");
        assert_eq!(config.max_attempts, 5);
        // Fields absent from the file keep their defaults.
        assert_eq!(config.reap_interval_secs, 30);
    }
}
