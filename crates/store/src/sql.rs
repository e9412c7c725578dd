// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! PostgreSQL [`crate::Store`] backing.
//!
//! `claim_task` uses `UPDATE ... WHERE status = 'pending' ... RETURNING`,
//! the single-statement form spec §4.1 calls out as sufficient on its own
//! (no `SELECT FOR UPDATE SKIP LOCKED` needed for a single-row update); the
//! pattern is otherwise grounded on the retrieved pack's `PgQueue::receive`,
//! which does need `FOR UPDATE SKIP LOCKED` because it picks N rows under a
//! CTE — reused here in `reap_expired`, which does exactly that.

use crate::{ClaimedTask, Cursor, CreatedTask, ReapCandidate, ReleaseOutcome, Store, TaskFilter, TaskPage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nanoid::nanoid;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use taskforge_core::{AgentType, Codebase, CodebaseStatus, CoreError, EventKind, OutboxEvent, Task, TaskEvent, TaskId, TaskStatus, Worker, WorkerId};

/// PostgreSQL-backed [`Store`]. The relational alternative to
/// [`crate::memory::MemoryStore`], used when `store.backing = "sql"`
/// (SPEC_FULL §6.3).
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(dsn: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(dsn)
            .await
            .map_err(|e| CoreError::Unavailable(format!("postgres connect: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("migration failed: {e}")))
    }
}

fn map_sqlx(e: sqlx::Error) -> CoreError {
    CoreError::Unavailable(format!("store: {e}"))
}

/// Writes an [`OutboxEvent`] in the same transaction as the task mutation
/// that caused it, so the server's outbox dispatcher can later fan it out
/// onto the in-memory `EventBus` without losing events across a restart
/// (SPEC_FULL §4 Outbox dispatcher).
async fn insert_outbox(tx: &mut Transaction<'_, Postgres>, topic: &str, codebase_id: &str, task_id: Option<TaskId>, kind: EventKind) -> Result<(), CoreError> {
    let payload = TaskEvent { id: 0, task_id, codebase_id: codebase_id.to_string(), at: Utc::now(), kind };
    sqlx::query("INSERT INTO outbox_events (topic, payload, created_at) VALUES ($1, $2, now())")
        .bind(topic)
        .bind(serde_json::to_value(&payload).unwrap_or_default())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<Task, CoreError> {
    let status_str: String = row.try_get("status").map_err(map_sqlx)?;
    let agent_type_str: String = row.try_get("agent_type").map_err(map_sqlx)?;
    let metadata_json: serde_json::Value = row.try_get("metadata").map_err(map_sqlx)?;
    let id_str: String = row.try_get("id").map_err(map_sqlx)?;
    Ok(Task {
        id: TaskId::from_string(&id_str),
        codebase_id: row.try_get("codebase_id").map_err(map_sqlx)?,
        title: row.try_get("title").map_err(map_sqlx)?,
        description: row.try_get("description").map_err(map_sqlx)?,
        agent_type: parse_agent_type(&agent_type_str)?,
        model: row.try_get("model").map_err(map_sqlx)?,
        priority: row.try_get("priority").map_err(map_sqlx)?,
        status: parse_status(&status_str)?,
        worker_id: row.try_get("worker_id").map_err(map_sqlx)?,
        claim_token: row.try_get("claim_token").map_err(map_sqlx)?,
        claim_deadline: row.try_get("claim_deadline").map_err(map_sqlx)?,
        result: row.try_get("result").map_err(map_sqlx)?,
        error: row.try_get("error").map_err(map_sqlx)?,
        output: row.try_get("output").map_err(map_sqlx)?,
        metadata: serde_json::from_value(metadata_json).unwrap_or_default(),
        notify_email: row.try_get("notify_email").map_err(map_sqlx)?,
        webhook_url: row.try_get("webhook_url").map_err(map_sqlx)?,
        attempts: row.try_get::<i32, _>("attempts").map_err(map_sqlx)? as u32,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
        completed_at: row.try_get("completed_at").map_err(map_sqlx)?,
        idempotency_key: row.try_get("idempotency_key").map_err(map_sqlx)?,
    })
}

fn parse_status(s: &str) -> Result<TaskStatus, CoreError> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "claimed" => Ok(TaskStatus::Claimed),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(CoreError::Internal(format!("unknown status in store row: {other}"))),
    }
}

fn parse_agent_type(s: &str) -> Result<AgentType, CoreError> {
    s.parse().map_err(|_| CoreError::Internal(format!("unknown agent_type in store row: {s}")))
}

fn row_to_worker(row: &sqlx::postgres::PgRow) -> Result<Worker, CoreError> {
    let id: String = row.try_get("id").map_err(map_sqlx)?;
    let codebases_json: serde_json::Value = row.try_get("codebases").map_err(map_sqlx)?;
    let models_json: serde_json::Value = row.try_get("models_supported").map_err(map_sqlx)?;
    Ok(Worker {
        id: WorkerId::new(id),
        name: row.try_get("name").map_err(map_sqlx)?,
        codebases: serde_json::from_value(codebases_json).unwrap_or_default(),
        models_supported: serde_json::from_value(models_json).unwrap_or_default(),
        last_seen_at: row.try_get("last_seen_at").map_err(map_sqlx)?,
        connection_id: row.try_get("connection_id").map_err(map_sqlx)?,
        active_claims: row.try_get::<i32, _>("active_claims").map_err(map_sqlx)? as u32,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn create_task(&self, task: Task, idempotency_key: Option<(&str, &str)>) -> Result<CreatedTask, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        if let Some((scope, key)) = idempotency_key {
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT task_id FROM idempotency_records WHERE scope = $1 AND key = $2")
                    .bind(scope)
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
            if let Some((task_id,)) = existing {
                let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
                    .bind(task_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                return Ok(CreatedTask { task: row_to_task(&row)?, inserted: false });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, codebase_id, title, description, agent_type, model, priority, status,
                worker_id, claim_token, claim_deadline, result, error, output, metadata,
                notify_email, webhook_url, attempts, created_at, updated_at, completed_at,
                idempotency_key
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.codebase_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.agent_type.to_string())
        .bind(&task.model)
        .bind(task.priority)
        .bind(task.status.to_string())
        .bind(&task.worker_id)
        .bind(&task.claim_token)
        .bind(task.claim_deadline)
        .bind(&task.result)
        .bind(&task.error)
        .bind(&task.output)
        .bind(serde_json::to_value(&task.metadata).unwrap_or_default())
        .bind(&task.notify_email)
        .bind(&task.webhook_url)
        .bind(task.attempts as i32)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.completed_at)
        .bind(&task.idempotency_key)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if let Some((scope, key)) = idempotency_key {
            sqlx::query("INSERT INTO idempotency_records (scope, key, task_id, created_at) VALUES ($1,$2,$3,$4)")
                .bind(scope)
                .bind(key)
                .bind(task.id.to_string())
                .bind(Utc::now())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }

        insert_outbox(&mut tx, &format!("task:{}", task.id), &task.codebase_id, Some(task.id), EventKind::Created).await?;
        insert_outbox(&mut tx, &format!("codebase:{}", task.codebase_id), &task.codebase_id, Some(task.id), EventKind::Created).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(CreatedTask { task, inserted: true })
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task, CoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        row_to_task(&row)
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<TaskPage, CoreError> {
        let limit = if filter.limit == 0 { 50 } else { filter.limit } as i64;
        let mut builder = sqlx::query(&build_list_query(&filter));
        if let Some(status) = filter.status {
            builder = builder.bind(status.to_string());
        }
        if let Some(codebase_id) = &filter.codebase_id {
            builder = builder.bind(codebase_id.clone());
        }
        if let Some(cursor) = &filter.cursor {
            builder = builder.bind(cursor.priority).bind(cursor.created_at).bind(cursor.id.clone());
        }
        builder = builder.bind(limit + 1);

        let rows = builder.fetch_all(&self.pool).await.map_err(map_sqlx)?;
        let mut tasks = rows.iter().map(row_to_task).collect::<Result<Vec<_>, _>>()?;
        let next_cursor = if tasks.len() as i64 > limit { tasks.get(limit as usize - 1).map(Cursor::after) } else { None };
        tasks.truncate(limit as usize);
        Ok(TaskPage { tasks, next_cursor })
    }

    async fn claim_task(&self, task_id: &TaskId, worker_id: &WorkerId, claim_deadline: DateTime<Utc>) -> Result<ClaimedTask, CoreError> {
        let token = nanoid!(24);
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'claimed', worker_id = $1, claim_token = $2, claim_deadline = $3, updated_at = now()
            WHERE id = $4 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(worker_id.as_str())
        .bind(&token)
        .bind(claim_deadline)
        .bind(task_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let row = match row {
            Some(row) => row,
            None => {
                let exists = self.get_task(task_id).await;
                return match exists {
                    Ok(_) => Err(CoreError::NotPending),
                    Err(e) => Err(e),
                };
            }
        };

        sqlx::query("UPDATE workers SET active_claims = active_claims + 1 WHERE id = $1")
            .bind(worker_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let task = row_to_task(&row)?;
        let kind = EventKind::Claimed { worker_id: worker_id.to_string() };
        insert_outbox(&mut tx, &format!("task:{task_id}"), &task.codebase_id, Some(*task_id), kind.clone()).await?;
        insert_outbox(&mut tx, &format!("codebase:{}", task.codebase_id), &task.codebase_id, Some(*task_id), kind).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(ClaimedTask { task, claim_token: token })
    }

    async fn release(&self, task_id: &TaskId, worker_id: &WorkerId, claim_token: &str, outcome: ReleaseOutcome) -> Result<Task, CoreError> {
        let current = self.get_task(task_id).await?;
        if current.status.is_terminal() {
            return Err(CoreError::AlreadyTerminal);
        }
        if current.worker_id.as_deref() != Some(worker_id.as_str()) || current.claim_token.as_deref() != Some(claim_token) {
            return Err(CoreError::StaleClaim);
        }
        let target = outcome.target_status();
        if !current.status.can_transition_to(target) {
            return Err(CoreError::InvalidTransition { from: current.status.to_string(), to: target.to_string() });
        }

        let (result, error, metadata) = match &outcome {
            ReleaseOutcome::Completed { result } => (result.clone(), String::new(), current.metadata.clone()),
            ReleaseOutcome::Failed { error } => {
                let mut m = current.metadata.clone();
                m.insert("failure_cause".into(), serde_json::json!("reported"));
                (String::new(), error.clone(), m)
            }
            ReleaseOutcome::Cancelled => (String::new(), String::new(), current.metadata.clone()),
        };

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, result = $2, error = $3, metadata = $4, claim_token = NULL,
                claim_deadline = NULL, updated_at = now(), completed_at = now()
            WHERE id = $5
            RETURNING *
            "#,
        )
        .bind(target.to_string())
        .bind(result.clone())
        .bind(error.clone())
        .bind(serde_json::to_value(metadata).unwrap_or_default())
        .bind(task_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("UPDATE workers SET active_claims = GREATEST(active_claims - 1, 0) WHERE id = $1")
            .bind(worker_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let task = row_to_task(&row)?;
        let kind = match &outcome {
            ReleaseOutcome::Completed { .. } => EventKind::Completed { result },
            ReleaseOutcome::Failed { .. } => EventKind::Failed { error },
            ReleaseOutcome::Cancelled => EventKind::Cancelled,
        };
        insert_outbox(&mut tx, &format!("task:{task_id}"), &task.codebase_id, Some(*task_id), kind.clone()).await?;
        insert_outbox(&mut tx, &format!("codebase:{}", task.codebase_id), &task.codebase_id, Some(*task_id), kind).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(task)
    }

    async fn heartbeat(&self, task_id: &TaskId, worker_id: &WorkerId, claim_token: &str, new_deadline: DateTime<Utc>) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET claim_deadline = $1, updated_at = now() WHERE id = $2 AND worker_id = $3 AND claim_token = $4",
        )
        .bind(new_deadline)
        .bind(task_id.to_string())
        .bind(worker_id.as_str())
        .bind(claim_token)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::StaleClaim);
        }
        Ok(())
    }

    async fn append_output(&self, task_id: &TaskId, worker_id: &WorkerId, claim_token: &str, delta: &str) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET output = output || $1,
                status = CASE WHEN status = 'claimed' THEN 'running' ELSE status END,
                updated_at = now()
            WHERE id = $2 AND worker_id = $3 AND claim_token = $4
            "#,
        )
        .bind(delta)
        .bind(task_id.to_string())
        .bind(worker_id.as_str())
        .bind(claim_token)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::StaleClaim);
        }
        Ok(())
    }

    async fn cancel(&self, task_id: &TaskId) -> Result<Task, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'cancelled', claim_token = NULL, claim_deadline = NULL,
                updated_at = now(), completed_at = now()
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            RETURNING *
            "#,
        )
        .bind(task_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let row = match row {
            Some(row) => row,
            None => {
                self.get_task(task_id).await?;
                return Err(CoreError::AlreadyTerminal);
            }
        };
        let task = row_to_task(&row)?;
        insert_outbox(&mut tx, &format!("task:{task_id}"), &task.codebase_id, Some(*task_id), EventKind::Cancelled).await?;
        insert_outbox(&mut tx, &format!("codebase:{}", task.codebase_id), &task.codebase_id, Some(*task_id), EventKind::Cancelled).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(task)
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<ReapCandidate>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, worker_id
            FROM tasks
            WHERE status IN ('claimed', 'running') AND claim_deadline < $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(map_sqlx)?;
                let worker_id: Option<String> = row.try_get("worker_id").map_err(map_sqlx)?;
                Ok(ReapCandidate { task_id: TaskId::from_string(&id), prior_worker: worker_id.map(WorkerId::new) })
            })
            .collect()
    }

    async fn upsert_worker(&self, worker: Worker) -> Result<Worker, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, name, codebases, models_supported, last_seen_at, connection_id, active_claims)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                codebases = EXCLUDED.codebases,
                models_supported = EXCLUDED.models_supported,
                last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(worker.id.as_str())
        .bind(&worker.name)
        .bind(serde_json::to_value(&worker.codebases).unwrap_or_default())
        .bind(serde_json::to_value(&worker.models_supported).unwrap_or_default())
        .bind(worker.last_seen_at)
        .bind(&worker.connection_id)
        .bind(worker.active_claims as i32)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(worker)
    }

    async fn touch_worker(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE workers SET last_seen_at = $1 WHERE id = $2")
            .bind(now)
            .bind(worker_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(worker_id.to_string()));
        }
        Ok(())
    }

    async fn mark_disconnected(&self, worker_id: &WorkerId) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE workers SET connection_id = NULL WHERE id = $1")
            .bind(worker_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(worker_id.to_string()));
        }
        Ok(())
    }

    async fn get_worker(&self, worker_id: &WorkerId) -> Result<Worker, CoreError> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = $1")
            .bind(worker_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| CoreError::NotFound(worker_id.to_string()))?;
        row_to_worker(&row)
    }

    async fn list_eligible_workers(
        &self,
        codebase_id: &str,
        model: Option<&str>,
        liveness_window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Worker>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workers
            WHERE last_seen_at > $1
              AND (codebases @> to_jsonb($2::text) OR codebases @> to_jsonb($3::text))
            "#,
        )
        .bind(now - liveness_window)
        .bind(codebase_id)
        .bind(taskforge_core::GLOBAL_CODEBASE)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(row_to_worker)
            .collect::<Result<Vec<_>, _>>()
            .map(|workers| workers.into_iter().filter(|w| w.supports_model(model) && w.serves_codebase(codebase_id)).collect())
    }

    async fn list_stale_live_workers(&self, liveness_window: chrono::Duration, now: DateTime<Utc>) -> Result<Vec<Worker>, CoreError> {
        let rows = sqlx::query("SELECT * FROM workers WHERE last_seen_at <= $1 AND active_claims > 0")
            .bind(now - liveness_window)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_worker).collect()
    }

    async fn get_codebase(&self, id: &str) -> Result<Option<Codebase>, CoreError> {
        let row = sqlx::query("SELECT * FROM codebases WHERE id = $1").bind(id).fetch_optional(&self.pool).await.map_err(map_sqlx)?;
        row.map(|r| row_to_codebase(&r)).transpose()
    }

    async fn upsert_codebase(&self, codebase: Codebase) -> Result<Codebase, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO codebases (id, name, path, worker_id, status)
            VALUES ($1,$2,$3,$4,$5)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, path = EXCLUDED.path,
                worker_id = EXCLUDED.worker_id, status = EXCLUDED.status
            "#,
        )
        .bind(&codebase.id)
        .bind(&codebase.name)
        .bind(&codebase.path)
        .bind(&codebase.worker_id)
        .bind(codebase.status.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(codebase)
    }

    async fn list_pending_for_worker(&self, codebases: &[String], model: Option<&str>) -> Result<Vec<Task>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE status = 'pending' AND codebase_id = ANY($1)
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .bind(codebases)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        let tasks = rows.iter().map(row_to_task).collect::<Result<Vec<_>, _>>()?;
        Ok(tasks.into_iter().filter(|t| model.is_none_or(|m| t.model.as_deref().is_none_or(|tm| tm == m))).collect())
    }

    async fn requeue_or_fail(&self, task_id: &TaskId, max_attempts: u32) -> Result<Task, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let current = sqlx::query("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        let current = row_to_task(&current)?;
        let attempts = current.attempts + 1;

        let row = if attempts < max_attempts {
            sqlx::query(
                r#"
                UPDATE tasks
                SET status = 'pending', worker_id = NULL, claim_token = NULL, claim_deadline = NULL,
                    attempts = $1, updated_at = now()
                WHERE id = $2
                RETURNING *
                "#,
            )
            .bind(attempts as i32)
            .bind(task_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?
        } else {
            let mut metadata = current.metadata.clone();
            metadata.insert("failure_cause".into(), serde_json::json!("worker_lost"));
            sqlx::query(
                r#"
                UPDATE tasks
                SET status = 'failed', error = 'worker_lost', attempts = $1, metadata = $2,
                    updated_at = now(), completed_at = now()
                WHERE id = $3
                RETURNING *
                "#,
            )
            .bind(attempts as i32)
            .bind(serde_json::to_value(metadata).unwrap_or_default())
            .bind(task_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?
        };

        if let Some(worker_id) = &current.worker_id {
            sqlx::query("UPDATE workers SET active_claims = GREATEST(active_claims - 1, 0) WHERE id = $1")
                .bind(worker_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }

        let task = row_to_task(&row)?;
        let kind = if task.status == TaskStatus::Pending {
            EventKind::Status { status: task.status.to_string() }
        } else {
            EventKind::Failed { error: task.error.clone() }
        };
        insert_outbox(&mut tx, &format!("task:{task_id}"), &task.codebase_id, Some(*task_id), kind.clone()).await?;
        insert_outbox(&mut tx, &format!("codebase:{}", task.codebase_id), &task.codebase_id, Some(*task_id), kind).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(task)
    }

    async fn force_expire_claims(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE tasks SET claim_deadline = $1 WHERE worker_id = $2 AND status IN ('claimed', 'running')",
        )
        .bind(now)
        .bind(worker_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn fetch_undelivered_outbox(&self, limit: i64) -> Result<Vec<OutboxEvent>, CoreError> {
        let rows = sqlx::query("SELECT id, topic, payload, created_at FROM outbox_events WHERE delivered_at IS NULL ORDER BY id ASC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id").map_err(map_sqlx)?;
                let topic: String = row.try_get("topic").map_err(map_sqlx)?;
                let payload_json: serde_json::Value = row.try_get("payload").map_err(map_sqlx)?;
                let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map_sqlx)?;
                let payload: TaskEvent = serde_json::from_value(payload_json)
                    .map_err(|e| CoreError::Internal(format!("outbox payload decode: {e}")))?;
                Ok(OutboxEvent { id, topic, payload, created_at, delivered_at: None })
            })
            .collect()
    }

    async fn mark_outbox_delivered(&self, ids: &[i64]) -> Result<(), CoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE outbox_events SET delivered_at = now() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

fn row_to_codebase(row: &sqlx::postgres::PgRow) -> Result<Codebase, CoreError> {
    let status_str: String = row.try_get("status").map_err(map_sqlx)?;
    Ok(Codebase {
        id: row.try_get("id").map_err(map_sqlx)?,
        name: row.try_get("name").map_err(map_sqlx)?,
        path: row.try_get("path").map_err(map_sqlx)?,
        worker_id: row.try_get("worker_id").map_err(map_sqlx)?,
        status: match status_str.as_str() {
            "active" => CodebaseStatus::Active,
            "draining" => CodebaseStatus::Draining,
            "retired" => CodebaseStatus::Retired,
            other => return Err(CoreError::Internal(format!("unknown codebase status: {other}"))),
        },
    })
}

fn build_list_query(filter: &TaskFilter) -> String {
    let mut q = String::from("SELECT * FROM tasks WHERE 1=1");
    let mut n = 1;
    if filter.status.is_some() {
        q.push_str(&format!(" AND status = ${n}"));
        n += 1;
    }
    if filter.codebase_id.is_some() {
        q.push_str(&format!(" AND codebase_id = ${n}"));
        n += 1;
    }
    if filter.cursor.is_some() {
        q.push_str(&format!(
            " AND (priority, created_at, id) < (${n}, ${}, ${})",
            n + 1,
            n + 2
        ));
        n += 3;
    }
    q.push_str(&format!(" ORDER BY priority DESC, created_at ASC, id ASC LIMIT ${n}"));
    q
}
