//! Task run records
//!
//! One `task_runs` row per execution attempt, keyed by execution id. Runs
//! for one task are totally ordered by `started_at`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use tapeflow_core::{Result, RunStatus};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::TaskRun;

/// Record the start of an execution
#[instrument(level = "debug", skip(pool))]
pub async fn record_run_start(
    pool: &PgPool,
    task_id: i64,
    execution_id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO task_runs (task_id, execution_id, started_at, status)
        VALUES ($1, $2, $3, 'running')
        "#,
    )
    .bind(task_id)
    .bind(execution_id)
    .bind(started_at)
    .execute(pool)
    .await?;

    debug!("🔧 Recorded run start for task {} ({})", task_id, execution_id);
    Ok(())
}

/// Record the end of an execution; duration is derived from the stored
/// start time.
#[instrument(level = "debug", skip(pool, result, error_message))]
pub async fn record_run_end(
    pool: &PgPool,
    execution_id: Uuid,
    completed_at: DateTime<Utc>,
    status: RunStatus,
    result: Option<&Value>,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE task_runs
        SET completed_at = $2,
            duration = GREATEST(0, EXTRACT(EPOCH FROM ($2 - started_at)))::INT,
            status = $3,
            result = $4,
            error_message = $5
        WHERE execution_id = $1
        "#,
    )
    .bind(execution_id)
    .bind(completed_at)
    .bind(status.as_str())
    .bind(result)
    .bind(error_message)
    .execute(pool)
    .await?;

    debug!("🔧 Recorded run end ({}) for execution {}", status, execution_id);
    Ok(())
}

/// List recent runs of one task, newest first
#[instrument(level = "debug", skip(pool))]
pub async fn list_task_runs(pool: &PgPool, task_id: i64, limit: i64) -> Result<Vec<TaskRun>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM task_runs
        WHERE task_id = $1
        ORDER BY started_at DESC
        LIMIT $2
        "#,
    )
    .bind(task_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(TaskRun::from_row).collect()
}

/// Delete the run history of a task (used by cascade delete)
#[instrument(level = "debug", skip(pool))]
pub async fn delete_task_runs(pool: &PgPool, task_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM task_runs WHERE task_id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
