// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Outbound webhook delivery with retries (spec §4.4 `Release`: "exponential
//! backoff, at least 5 attempts, jitter, maximum age 24h").
//!
//! Backoff formula grounded on the retrieved pack's `codex-rs/core/src/util.rs::backoff`.

use rand::Rng;
use std::time::Duration;
use taskforge_core::Task;
use tokio::sync::mpsc;

const INITIAL_DELAY_MS: u64 = 500;
const BACKOFF_FACTOR: f64 = 2.0;
const MIN_ATTEMPTS: u32 = 5;

fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    let base = (INITIAL_DELAY_MS as f64 * exp) as u64;
    let jitter = rand::rng().random_range(0.9..1.1);
    Duration::from_millis((base as f64 * jitter) as u64)
}

struct Delivery {
    url: String,
    task: Task,
}

/// Background dispatcher for `task.webhook_url` callbacks. Each delivery
/// retries with backoff until it succeeds, exhausts its attempt budget
/// (`max(MIN_ATTEMPTS, attempts until max_age)`), or the task is older than
/// `max_age`.
pub struct WebhookDispatcher {
    tx: Option<mpsc::UnboundedSender<Delivery>>,
    max_age: chrono::Duration,
}

impl WebhookDispatcher {
    /// Spawns the delivery worker loop on the current Tokio runtime.
    pub fn spawn(client: reqwest::Client, max_age: chrono::Duration) -> (Self, impl std::future::Future<Output = ()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let worker_max_age = max_age;
        let worker = async move {
            while let Some(delivery) = rx.recv().await {
                let client = client.clone();
                tokio::spawn(deliver_with_retry(client, delivery, worker_max_age));
            }
        };
        (Self { tx: Some(tx), max_age }, worker)
    }

    /// A dispatcher that drops every delivery — used in tests and wherever
    /// webhook delivery is out of scope.
    pub fn new_disabled() -> Self {
        Self { tx: None, max_age: chrono::Duration::hours(24) }
    }

    pub fn schedule(&self, url: String, task: Task) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Delivery { url, task });
        }
    }

    pub fn max_age(&self) -> chrono::Duration {
        self.max_age
    }
}

async fn deliver_with_retry(client: reqwest::Client, delivery: Delivery, max_age: chrono::Duration) {
    let deadline = delivery.task.completed_at.unwrap_or(delivery.task.updated_at) + max_age;
    let body = serde_json::json!({
        "task_id": delivery.task.id.to_string(),
        "status": delivery.task.status.to_string(),
        "result": delivery.task.result,
        "error": delivery.task.error,
    });

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if chrono::Utc::now() > deadline {
            tracing::warn!(task_id = %delivery.task.id, attempt, "webhook delivery abandoned: past max_age");
            return;
        }

        match client.post(&delivery.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(task_id = %delivery.task.id, attempt, "webhook delivered");
                return;
            }
            Ok(resp) => {
                tracing::warn!(task_id = %delivery.task.id, attempt, status = %resp.status(), "webhook delivery rejected");
            }
            Err(e) => {
                tracing::warn!(task_id = %delivery.task.id, attempt, error = %e, "webhook delivery failed");
            }
        }

        if attempt >= MIN_ATTEMPTS && chrono::Utc::now() + chrono::Duration::from_std(backoff(attempt + 1)).unwrap_or_default() > deadline {
            tracing::warn!(task_id = %delivery.task.id, attempt, "webhook delivery giving up: next retry exceeds max_age");
            return;
        }

        tokio::time::sleep(backoff(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_with_jitter() {
        let d1 = backoff(1).as_millis();
        let d3 = backoff(3).as_millis();
        assert!(d1 >= (INITIAL_DELAY_MS as f64 * 0.9) as u128);
        assert!(d3 > d1);
    }

    #[test]
    fn disabled_dispatcher_schedule_is_a_no_op() {
        let dispatcher = WebhookDispatcher::new_disabled();
        let task = taskforge_core::Task::builder().build();
        dispatcher.schedule("https://example.test/hook".into(), task);
    }
}
