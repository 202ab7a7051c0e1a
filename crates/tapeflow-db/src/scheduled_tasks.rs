//! Scheduled-task storage for TapeFlow
//!
//! CRUD and counter updates for the `scheduled_tasks` table. Counter updates
//! are single statements so concurrent executions of *different* tasks never
//! read-modify-write each other's rows.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tapeflow_core::{Result, ScheduledTaskStatus, TapeflowError};
use tracing::{debug, info, instrument};

use crate::models::{NewScheduledTask, ScheduledTask, ScheduledTaskPatch};

/// Create a new scheduled task. A duplicate `task_name` surfaces as
/// `Conflict`.
#[instrument(level = "debug", skip(pool, task), fields(task_name = %task.task_name))]
pub async fn create_scheduled_task(pool: &PgPool, task: &NewScheduledTask) -> Result<ScheduledTask> {
    debug!("🔧 Creating scheduled task: {}", task.task_name);

    let row = sqlx::query(
        r#"
        INSERT INTO scheduled_tasks
            (task_name, description, schedule_type, schedule_config,
             action_type, action_config, enabled, status,
             task_metadata, tags, backup_task_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(&task.task_name)
    .bind(&task.description)
    .bind(task.schedule_type.as_str())
    .bind(&task.schedule_config)
    .bind(task.action_type.as_str())
    .bind(&task.action_config)
    .bind(task.enabled)
    .bind(if task.enabled {
        ScheduledTaskStatus::Active.as_str()
    } else {
        ScheduledTaskStatus::Inactive.as_str()
    })
    .bind(&task.task_metadata)
    .bind(&task.tags)
    .bind(task.backup_task_id)
    .fetch_one(pool)
    .await?;

    let task = ScheduledTask::from_row(&row)?;
    info!("✅ Created scheduled task: {} (ID: {})", task.task_name, task.id);
    Ok(task)
}

/// Get a scheduled task by id
#[instrument(level = "debug", skip(pool))]
pub async fn get_scheduled_task(pool: &PgPool, id: i64) -> Result<Option<ScheduledTask>> {
    sqlx::query("SELECT * FROM scheduled_tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| ScheduledTask::from_row(&row))
        .transpose()
}

/// Get a scheduled task by unique name
#[instrument(level = "debug", skip(pool))]
pub async fn get_scheduled_task_by_name(pool: &PgPool, name: &str) -> Result<Option<ScheduledTask>> {
    sqlx::query("SELECT * FROM scheduled_tasks WHERE task_name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .map(|row| ScheduledTask::from_row(&row))
        .transpose()
}

/// List scheduled tasks, optionally restricted to enabled ones
#[instrument(level = "debug", skip(pool))]
pub async fn list_scheduled_tasks(pool: &PgPool, enabled_only: bool) -> Result<Vec<ScheduledTask>> {
    let rows = if enabled_only {
        sqlx::query("SELECT * FROM scheduled_tasks WHERE enabled = TRUE ORDER BY id")
            .fetch_all(pool)
            .await?
    } else {
        sqlx::query("SELECT * FROM scheduled_tasks ORDER BY id")
            .fetch_all(pool)
            .await?
    };

    rows.iter().map(ScheduledTask::from_row).collect()
}

/// Apply a patch to a scheduled task and return the updated row
#[instrument(level = "debug", skip(pool, patch))]
pub async fn update_scheduled_task(
    pool: &PgPool,
    id: i64,
    patch: &ScheduledTaskPatch,
) -> Result<Option<ScheduledTask>> {
    let row = sqlx::query(
        r#"
        UPDATE scheduled_tasks
        SET task_name = COALESCE($2, task_name),
            description = COALESCE($3, description),
            schedule_type = COALESCE($4, schedule_type),
            schedule_config = COALESCE($5, schedule_config),
            action_type = COALESCE($6, action_type),
            action_config = COALESCE($7, action_config),
            enabled = COALESCE($8, enabled),
            status = COALESCE($9, status),
            task_metadata = COALESCE($10, task_metadata),
            tags = COALESCE($11, tags),
            backup_task_id = COALESCE($12, backup_task_id),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&patch.task_name)
    .bind(&patch.description)
    .bind(patch.schedule_type.map(|t| t.as_str()))
    .bind(&patch.schedule_config)
    .bind(patch.action_type.map(|t| t.as_str()))
    .bind(&patch.action_config)
    .bind(patch.enabled)
    .bind(patch.status.map(|s| s.as_str()))
    .bind(&patch.task_metadata)
    .bind(&patch.tags)
    .bind(patch.backup_task_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| ScheduledTask::from_row(&row)).transpose()
}

/// Persist a freshly computed next run time
#[instrument(level = "debug", skip(pool))]
pub async fn set_next_run_time(
    pool: &PgPool,
    id: i64,
    next_run: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query("UPDATE scheduled_tasks SET next_run_time = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(next_run)
        .execute(pool)
        .await?;
    Ok(())
}

/// Set the lifecycle status of a task
#[instrument(level = "debug", skip(pool))]
pub async fn set_task_status(pool: &PgPool, id: i64, status: ScheduledTaskStatus) -> Result<()> {
    sqlx::query("UPDATE scheduled_tasks SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Flip a task to running and stamp `last_run_time`
#[instrument(level = "debug", skip(pool))]
pub async fn mark_task_running(pool: &PgPool, id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scheduled_tasks
        SET status = 'running', last_run_time = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a successful execution: bump counters, fold the duration into the
/// running mean, store the next run time and return the task to `active`.
#[instrument(level = "debug", skip(pool))]
pub async fn record_task_success(
    pool: &PgPool,
    id: i64,
    completed_at: DateTime<Utc>,
    duration_secs: i32,
    next_run: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scheduled_tasks
        SET status = 'active',
            last_success_time = $2,
            total_runs = total_runs + 1,
            success_runs = success_runs + 1,
            average_duration = CASE
                WHEN average_duration IS NULL THEN $3
                ELSE (average_duration + $3) / 2
            END,
            next_run_time = $4,
            last_error = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(completed_at)
    .bind(duration_secs)
    .bind(next_run)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed execution: bump counters, store the error, flip to
/// `error` status.
#[instrument(level = "debug", skip(pool, error))]
pub async fn record_task_failure(
    pool: &PgPool,
    id: i64,
    failed_at: DateTime<Utc>,
    error: &str,
    next_run: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scheduled_tasks
        SET status = 'error',
            total_runs = total_runs + 1,
            failure_runs = failure_runs + 1,
            last_failure_time = $2,
            last_error = $3,
            next_run_time = $4,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(failed_at)
    .bind(error)
    .bind(next_run)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a scheduled task row
#[instrument(level = "debug", skip(pool))]
pub async fn delete_scheduled_task(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    info!("✅ Deleted scheduled task: {}", id);
    Ok(true)
}

/// Reset every task stuck in `running` back to `active` (crash recovery)
#[instrument(level = "debug", skip(pool))]
pub async fn reset_running_tasks(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE scheduled_tasks
        SET status = 'active', updated_at = NOW()
        WHERE status = 'running'
        "#,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Reset one task from `running` back to `active`; returns whether the row
/// changed. Missing task surfaces as `NotFound`.
#[instrument(level = "debug", skip(pool))]
pub async fn reset_running_task(pool: &PgPool, id: i64) -> Result<bool> {
    let task = get_scheduled_task(pool, id)
        .await?
        .ok_or_else(|| TapeflowError::NotFound(format!("scheduled task {}", id)))?;

    if task.status != ScheduledTaskStatus::Running {
        debug!("Task {} is {}, no reset needed", id, task.status);
        return Ok(false);
    }

    set_task_status(pool, id, ScheduledTaskStatus::Active).await?;
    info!("✅ Task {} status reset from running to active", id);
    Ok(true)
}
