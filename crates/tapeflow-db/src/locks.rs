//! Per-task execution locks
//!
//! One active lock row serializes execution per scheduled task. Acquisition
//! is a single compare-and-set insert against the partial unique index on
//! `(task_id) WHERE is_active`; released rows stay behind for audit.
//!
//! Acquisition fails closed: an SQL error is an error, never a held lock.

use sqlx::postgres::PgPool;
use tapeflow_core::Result;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::models::TaskLock;

/// Try to take the execution lock for a task. Returns `true` iff this
/// caller now holds the lock.
#[instrument(level = "debug", skip(pool))]
pub async fn acquire_task_lock(pool: &PgPool, task_id: i64, execution_id: Uuid) -> Result<bool> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO task_locks (task_id, execution_id, locked_at, is_active)
        VALUES ($1, $2, NOW(), TRUE)
        ON CONFLICT (task_id) WHERE is_active DO NOTHING
        RETURNING id
        "#,
    )
    .bind(task_id)
    .bind(execution_id)
    .fetch_optional(pool)
    .await?;

    let acquired = inserted.is_some();
    debug!(
        "🔒 Lock acquisition for task {}: {}",
        task_id,
        if acquired { "acquired" } else { "already held" }
    );
    Ok(acquired)
}

/// Release the lock held by a specific execution
#[instrument(level = "debug", skip(pool))]
pub async fn release_task_lock(pool: &PgPool, task_id: i64, execution_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE task_locks
        SET is_active = FALSE
        WHERE task_id = $1 AND execution_id = $2 AND is_active
        "#,
    )
    .bind(task_id)
    .bind(execution_id)
    .execute(pool)
    .await?;

    debug!("🔓 Released lock for task {} ({})", task_id, execution_id);
    Ok(())
}

/// Force-release every active lock for a task (operator recovery)
#[instrument(level = "debug", skip(pool))]
pub async fn release_locks_by_task(pool: &PgPool, task_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_locks SET is_active = FALSE WHERE task_id = $1 AND is_active",
    )
    .bind(task_id)
    .execute(pool)
    .await?;

    let released = result.rows_affected();
    if released > 0 {
        info!("✅ Force-released {} lock(s) for task {}", released, task_id);
    }
    Ok(released)
}

/// Release every active lock in the system (startup crash recovery)
#[instrument(level = "debug", skip(pool))]
pub async fn release_all_locks(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("UPDATE task_locks SET is_active = FALSE WHERE is_active")
        .execute(pool)
        .await?;

    let released = result.rows_affected();
    info!("✅ Released {} active task lock(s)", released);
    Ok(released)
}

/// Drop every lock row of a task, active or not (task deletion)
#[instrument(level = "debug", skip(pool))]
pub async fn delete_locks_for_task(pool: &PgPool, task_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM task_locks WHERE task_id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Fetch the currently active lock for a task, if any
#[instrument(level = "debug", skip(pool))]
pub async fn get_active_lock(pool: &PgPool, task_id: i64) -> Result<Option<TaskLock>> {
    sqlx::query("SELECT * FROM task_locks WHERE task_id = $1 AND is_active")
        .bind(task_id)
        .fetch_optional(pool)
        .await?
        .map(|row| TaskLock::from_row(&row))
        .transpose()
}
