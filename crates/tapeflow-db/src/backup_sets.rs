//! Backup set storage
//!
//! One `backup_sets` row per archival unit. Sets are created when a backup
//! execution starts and finalized once the compressor has drained the
//! pending-file stream.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tapeflow_core::{BackupSetStatus, BackupTaskType, Result};
use tracing::{info, instrument};

use crate::models::BackupSet;

/// Create a backup set for an execution. `backup_group` is the month bucket
/// (`YYYY-MM`) used by retention policy.
#[instrument(level = "debug", skip(pool))]
pub async fn create_backup_set(
    pool: &PgPool,
    set_id: &str,
    set_name: &str,
    backup_task_id: i64,
    backup_type: BackupTaskType,
    backup_time: DateTime<Utc>,
    retention_days: i32,
) -> Result<BackupSet> {
    let backup_group = backup_time.format("%Y-%m").to_string();
    let retention_until = backup_time + Duration::days(retention_days as i64);

    let row = sqlx::query(
        r#"
        INSERT INTO backup_sets
            (set_id, set_name, backup_group, status, backup_task_id,
             backup_type, backup_time, retention_until)
        VALUES ($1, $2, $3, 'active', $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(set_id)
    .bind(set_name)
    .bind(&backup_group)
    .bind(backup_task_id)
    .bind(backup_type.as_str())
    .bind(backup_time)
    .bind(retention_until)
    .fetch_one(pool)
    .await?;

    let set = BackupSet::from_row(&row)?;
    info!("✅ Created backup set {} (group {})", set.set_id, set.backup_group);
    Ok(set)
}

/// Get a backup set by its numeric id
#[instrument(level = "debug", skip(pool))]
pub async fn get_backup_set(pool: &PgPool, id: i64) -> Result<Option<BackupSet>> {
    sqlx::query("SELECT * FROM backup_sets WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| BackupSet::from_row(&row))
        .transpose()
}

/// Get a backup set by its external `set_id` string (staging directory name)
#[instrument(level = "debug", skip(pool))]
pub async fn get_backup_set_by_set_id(pool: &PgPool, set_id: &str) -> Result<Option<BackupSet>> {
    sqlx::query("SELECT * FROM backup_sets WHERE set_id = $1")
        .bind(set_id)
        .fetch_optional(pool)
        .await?
        .map(|row| BackupSet::from_row(&row))
        .transpose()
}

/// List the sets belonging to one backup execution
#[instrument(level = "debug", skip(pool))]
pub async fn list_sets_for_task(pool: &PgPool, backup_task_id: i64) -> Result<Vec<BackupSet>> {
    let rows = sqlx::query(
        "SELECT * FROM backup_sets WHERE backup_task_id = $1 ORDER BY backup_time",
    )
    .bind(backup_task_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(BackupSet::from_row).collect()
}

/// Record final statistics once the compressor has drained the stream
#[instrument(level = "debug", skip(pool))]
pub async fn finalize_backup_set(
    pool: &PgPool,
    id: i64,
    status: BackupSetStatus,
    total_files: i64,
    total_bytes: i64,
    compressed_bytes: i64,
) -> Result<()> {
    let ratio = if total_bytes > 0 {
        compressed_bytes as f64 / total_bytes as f64
    } else {
        0.0
    };

    sqlx::query(
        r#"
        UPDATE backup_sets
        SET status = $2,
            total_files = $3,
            total_bytes = $4,
            compressed_bytes = $5,
            compression_ratio = $6
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(total_files)
    .bind(total_bytes)
    .bind(compressed_bytes)
    .bind(ratio)
    .execute(pool)
    .await?;

    info!(
        "✅ Finalized backup set {}: {} files, {} -> {} bytes",
        id, total_files, total_bytes, compressed_bytes
    );
    Ok(())
}

/// Count active sets whose retention window has lapsed
#[instrument(level = "debug", skip(pool))]
pub async fn count_expired_sets(pool: &PgPool, as_of: DateTime<Utc>) -> Result<i64> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS expired
        FROM backup_sets
        WHERE status = 'active' AND retention_until IS NOT NULL AND retention_until < $1
        "#,
    )
    .bind(as_of)
    .fetch_one(pool)
    .await?;

    Ok(row.try_get("expired")?)
}

/// Attach the tape a set was written to
#[instrument(level = "debug", skip(pool))]
pub async fn set_backup_set_tape(pool: &PgPool, id: i64, tape_id: &str) -> Result<()> {
    sqlx::query("UPDATE backup_sets SET tape_id = $2 WHERE id = $1")
        .bind(id)
        .bind(tape_id)
        .execute(pool)
        .await?;
    Ok(())
}
