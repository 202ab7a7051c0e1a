//! Backup task storage
//!
//! `backup_tasks` holds both templates (`is_template = TRUE`) and execution
//! records pointing back at their template. The action handler's per-template
//! running guard and the scan-status handshake live here.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tapeflow_core::{BackupTaskStatus, OperationStage, Result, ScanStatus, TapeflowError};
use tracing::{debug, info, instrument};

use crate::models::{
    BackupStatistics, BackupTask, BackupTemplatePatch, NewBackupTemplate,
};

/// Filter for listing backup tasks
#[derive(Debug, Clone, Default)]
pub struct BackupTaskFilter {
    pub status: Option<BackupTaskStatus>,
    pub task_type: Option<tapeflow_core::BackupTaskType>,
    pub name_like: Option<String>,
    pub templates_only: bool,
}

/// Create a backup template
#[instrument(level = "debug", skip(pool, template), fields(task_name = %template.task_name))]
pub async fn create_backup_template(
    pool: &PgPool,
    template: &NewBackupTemplate,
) -> Result<BackupTask> {
    debug!("🔧 Creating backup template: {}", template.task_name);

    let row = sqlx::query(
        r#"
        INSERT INTO backup_tasks
            (task_name, task_type, description, is_template, status,
             source_paths, exclude_patterns, compression_enabled,
             encryption_enabled, retention_days, tape_device)
        VALUES ($1, $2, $3, TRUE, 'pending', $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(&template.task_name)
    .bind(template.task_type.as_str())
    .bind(&template.description)
    .bind(&template.source_paths)
    .bind(&template.exclude_patterns)
    .bind(template.compression_enabled)
    .bind(template.encryption_enabled)
    .bind(template.retention_days)
    .bind(&template.tape_device)
    .fetch_one(pool)
    .await?;

    let task = BackupTask::from_row(&row)?;
    info!("✅ Created backup template: {} (ID: {})", task.task_name, task.id);
    Ok(task)
}

/// Create an execution record inheriting the template's configuration
#[instrument(level = "debug", skip(pool, template))]
pub async fn create_execution_from_template(
    pool: &PgPool,
    template: &BackupTask,
    task_name: &str,
) -> Result<BackupTask> {
    if !template.is_template {
        return Err(TapeflowError::Validation(format!(
            "backup task {} is not a template",
            template.id
        )));
    }

    let row = sqlx::query(
        r#"
        INSERT INTO backup_tasks
            (task_name, task_type, description, is_template, template_id,
             status, source_paths, exclude_patterns, compression_enabled,
             encryption_enabled, retention_days, tape_device)
        VALUES ($1, $2, $3, FALSE, $4, 'pending', $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(task_name)
    .bind(template.task_type.as_str())
    .bind(&template.description)
    .bind(template.id)
    .bind(&template.source_paths)
    .bind(&template.exclude_patterns)
    .bind(template.compression_enabled)
    .bind(template.encryption_enabled)
    .bind(template.retention_days)
    .bind(&template.tape_device)
    .fetch_one(pool)
    .await?;

    let task = BackupTask::from_row(&row)?;
    info!(
        "✅ Created backup execution {} (ID: {}) from template {}",
        task.task_name, task.id, template.id
    );
    Ok(task)
}

/// Get a backup task (template or execution) by id
#[instrument(level = "debug", skip(pool))]
pub async fn get_backup_task(pool: &PgPool, id: i64) -> Result<Option<BackupTask>> {
    sqlx::query("SELECT * FROM backup_tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| BackupTask::from_row(&row))
        .transpose()
}

/// List backup tasks with optional filters
#[instrument(level = "debug", skip(pool, filter))]
pub async fn list_backup_tasks(pool: &PgPool, filter: &BackupTaskFilter) -> Result<Vec<BackupTask>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM backup_tasks
        WHERE ($1::TEXT IS NULL OR status = $1)
          AND ($2::TEXT IS NULL OR task_type = $2)
          AND ($3::TEXT IS NULL OR task_name ILIKE '%' || $3 || '%')
          AND (NOT $4 OR is_template)
        ORDER BY created_at DESC
        "#,
    )
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.task_type.map(|t| t.as_str()))
    .bind(&filter.name_like)
    .bind(filter.templates_only)
    .fetch_all(pool)
    .await?;

    rows.iter().map(BackupTask::from_row).collect()
}

/// Update a backup template; rejects execution records
#[instrument(level = "debug", skip(pool, patch))]
pub async fn update_backup_template(
    pool: &PgPool,
    id: i64,
    patch: &BackupTemplatePatch,
) -> Result<Option<BackupTask>> {
    let existing = match get_backup_task(pool, id).await? {
        Some(task) => task,
        None => return Ok(None),
    };
    if !existing.is_template {
        return Err(TapeflowError::Validation(format!(
            "backup task {} is an execution record and cannot be edited",
            id
        )));
    }

    let row = sqlx::query(
        r#"
        UPDATE backup_tasks
        SET task_name = COALESCE($2, task_name),
            description = COALESCE($3, description),
            source_paths = COALESCE($4, source_paths),
            exclude_patterns = COALESCE($5, exclude_patterns),
            compression_enabled = COALESCE($6, compression_enabled),
            encryption_enabled = COALESCE($7, encryption_enabled),
            retention_days = COALESCE($8, retention_days),
            tape_device = COALESCE($9, tape_device),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&patch.task_name)
    .bind(&patch.description)
    .bind(&patch.source_paths)
    .bind(&patch.exclude_patterns)
    .bind(patch.compression_enabled)
    .bind(patch.encryption_enabled)
    .bind(patch.retention_days)
    .bind(&patch.tape_device)
    .fetch_optional(pool)
    .await?;

    row.map(|row| BackupTask::from_row(&row)).transpose()
}

/// Delete a backup task. Deleting a template cascades over its execution
/// records; deleting anything cascades over its backup sets and their files.
#[instrument(level = "debug", skip(pool))]
pub async fn delete_backup_task_cascade(pool: &PgPool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let exists = sqlx::query("SELECT id FROM backup_tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Ok(false);
    }

    sqlx::query(
        r#"
        DELETE FROM backup_files
        WHERE backup_set_id IN (
            SELECT id FROM backup_sets
            WHERE backup_task_id = $1
               OR backup_task_id IN (SELECT id FROM backup_tasks WHERE template_id = $1)
        )
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM backup_sets
        WHERE backup_task_id = $1
           OR backup_task_id IN (SELECT id FROM backup_tasks WHERE template_id = $1)
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM backup_tasks WHERE template_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM backup_tasks WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!("✅ Deleted backup task {} with its executions, sets and files", id);
    Ok(true)
}

/// Mark a pending/running execution cancelled
#[instrument(level = "debug", skip(pool))]
pub async fn cancel_backup_task(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE backup_tasks
        SET status = 'cancelled', completed_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'running', 'paused')
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Find the running execution of a template, if any (per-template
/// concurrency guard)
#[instrument(level = "debug", skip(pool))]
pub async fn find_running_execution(pool: &PgPool, template_id: i64) -> Result<Option<BackupTask>> {
    sqlx::query(
        r#"
        SELECT * FROM backup_tasks
        WHERE template_id = $1 AND status = 'running' AND NOT is_template
        ORDER BY started_at DESC NULLS LAST
        LIMIT 1
        "#,
    )
    .bind(template_id)
    .fetch_optional(pool)
    .await?
    .map(|row| BackupTask::from_row(&row))
    .transpose()
}

/// Flip an execution to running and attach its backup set
#[instrument(level = "debug", skip(pool))]
pub async fn mark_execution_started(
    pool: &PgPool,
    id: i64,
    backup_set_id: &str,
    started_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE backup_tasks
        SET status = 'running', started_at = $2, backup_set_id = $3,
            operation_stage = 'scan', updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(started_at)
    .bind(backup_set_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Advance the coarse progress stage of an execution
#[instrument(level = "debug", skip(pool))]
pub async fn set_operation_stage(pool: &PgPool, id: i64, stage: OperationStage) -> Result<()> {
    sqlx::query(
        "UPDATE backup_tasks SET operation_stage = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(stage.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Set a terminal (or paused) status, optionally with an error message
#[instrument(level = "debug", skip(pool, error))]
pub async fn set_backup_task_status(
    pool: &PgPool,
    id: i64,
    status: BackupTaskStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE backup_tasks
        SET status = $2,
            error_message = COALESCE($3, error_message),
            completed_at = CASE
                WHEN $2 IN ('completed', 'failed', 'cancelled') THEN NOW()
                ELSE completed_at
            END,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Read the file-scanner handshake state for an execution
#[instrument(level = "debug", skip(pool))]
pub async fn get_scan_status(pool: &PgPool, id: i64) -> Result<ScanStatus> {
    let row = sqlx::query("SELECT scan_status FROM backup_tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| TapeflowError::NotFound(format!("backup task {}", id)))?;

    let status: String = row.try_get("scan_status")?;
    status.parse()
}

/// Update the file-scanner handshake state for an execution
#[instrument(level = "debug", skip(pool))]
pub async fn set_scan_status(
    pool: &PgPool,
    id: i64,
    status: ScanStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE backup_tasks
        SET scan_status = $2,
            scan_completed_at = COALESCE($3, scan_completed_at),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(completed_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fold scanner discoveries into the execution's totals
#[instrument(level = "debug", skip(pool))]
pub async fn add_scanned_totals(pool: &PgPool, id: i64, files: i64, bytes: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE backup_tasks
        SET total_files = total_files + $2,
            total_bytes = total_bytes + $3,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(files)
    .bind(bytes)
    .execute(pool)
    .await?;
    Ok(())
}

/// Aggregate statistics over execution records. Uses portable
/// `SUM(CASE ...)` aggregates rather than dialect-specific `FILTER`.
#[instrument(level = "debug", skip(pool))]
pub async fn backup_statistics(pool: &PgPool) -> Result<BackupStatistics> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_executions,
            SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END) AS running,
            SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
            SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
            SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END) AS cancelled,
            COALESCE(SUM(total_bytes), 0) AS total_bytes,
            COALESCE(SUM(compressed_bytes), 0) AS compressed_bytes,
            COALESCE(SUM(total_files), 0) AS total_files
        FROM backup_tasks
        WHERE NOT is_template
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(BackupStatistics {
        total_executions: row.try_get::<i64, _>("total_executions")?,
        running: row.try_get::<Option<i64>, _>("running")?.unwrap_or(0),
        completed: row.try_get::<Option<i64>, _>("completed")?.unwrap_or(0),
        failed: row.try_get::<Option<i64>, _>("failed")?.unwrap_or(0),
        cancelled: row.try_get::<Option<i64>, _>("cancelled")?.unwrap_or(0),
        total_bytes: row.try_get::<i64, _>("total_bytes")?,
        compressed_bytes: row.try_get::<i64, _>("compressed_bytes")?,
        total_files: row.try_get::<i64, _>("total_files")?,
    })
}
