//! Per-file backup bookkeeping
//!
//! The prefetcher's grouped fetch, the defensive full sweep, and the
//! idempotent bulk mark-copied update live here. Grouping happens at file
//! granularity: one file never crosses groups, an oversize file forms its
//! own singleton group.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tapeflow_core::{FileKind, Result};
use tracing::{debug, instrument, warn};

use crate::models::{BackupFile, FileRecord};

/// Rows pulled from the pending-file index per grouped fetch
const FETCH_BATCH_LIMIT: i64 = 5000;

/// Fields accepted when recording a scanned file
#[derive(Debug, Clone)]
pub struct NewBackupFile {
    pub backup_set_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub directory_path: String,
    pub file_type: FileKind,
    pub file_size: i64,
    pub modified_time: Option<DateTime<Utc>>,
}

/// Split pending files into groups whose cumulative size stays within the
/// budget. Files keep their id order; an oversize file becomes a singleton
/// group.
pub fn group_files_by_size(files: Vec<FileRecord>, max_group_bytes: i64) -> Vec<Vec<FileRecord>> {
    let mut groups: Vec<Vec<FileRecord>> = Vec::new();
    let mut current: Vec<FileRecord> = Vec::new();
    let mut current_bytes: i64 = 0;

    for file in files {
        if file.file_size >= max_group_bytes {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            groups.push(vec![file]);
            continue;
        }

        if current_bytes + file.file_size > max_group_bytes && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current_bytes += file.file_size;
        current.push(file);
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Fetch the next batch of pending files for a backup set, grouped by the
/// size budget. Returns the groups and the new cursor (highest file id
/// delivered).
///
/// Cursor semantics: a returned cursor of `0` while the caller's cursor was
/// positive signals an anomaly — pending rows exist at or below the cursor,
/// so the caller must restart from the beginning.
///
/// With `wait_if_small`, a batch that neither fills the size budget nor the
/// row limit is held back so the scanner can accumulate a full group.
#[instrument(level = "debug", skip(pool))]
pub async fn fetch_pending_files_grouped_by_size(
    pool: &PgPool,
    backup_set_id: i64,
    max_group_bytes: i64,
    start_from_id: i64,
    wait_if_small: bool,
) -> Result<(Vec<Vec<FileRecord>>, i64)> {
    let rows = sqlx::query(
        r#"
        SELECT id, file_path, file_name, directory_path, file_type,
               file_size, modified_time
        FROM backup_files
        WHERE backup_set_id = $1
          AND is_copy_success IS NOT TRUE
          AND file_type = 'file'
          AND id > $2
        ORDER BY id
        LIMIT $3
        "#,
    )
    .bind(backup_set_id)
    .bind(start_from_id)
    .bind(FETCH_BATCH_LIMIT)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        if start_from_id > 0 {
            // Pending rows at or below the cursor mean the cursor ran past
            // files that were never delivered; signal a restart.
            let missed = sqlx::query(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM backup_files
                    WHERE backup_set_id = $1
                      AND is_copy_success IS NOT TRUE
                      AND file_type = 'file'
                      AND id <= $2
                ) AS missed
                "#,
            )
            .bind(backup_set_id)
            .bind(start_from_id)
            .fetch_one(pool)
            .await?
            .try_get::<bool, _>("missed")?;

            if missed {
                warn!(
                    "⚠️ Pending files found at or below cursor {} for set {}, signalling restart",
                    start_from_id, backup_set_id
                );
                return Ok((Vec::new(), 0));
            }
        }
        return Ok((Vec::new(), start_from_id));
    }

    let files: Vec<FileRecord> = rows
        .iter()
        .map(FileRecord::from_row)
        .collect::<Result<_>>()?;

    let total_bytes: i64 = files.iter().map(|f| f.file_size).sum();
    if wait_if_small
        && (files.len() as i64) < FETCH_BATCH_LIMIT
        && total_bytes < max_group_bytes
    {
        debug!(
            "🔧 Holding back small batch for set {} ({} files, {} bytes)",
            backup_set_id,
            files.len(),
            total_bytes
        );
        return Ok((Vec::new(), start_from_id));
    }

    let cursor = files.iter().map(|f| f.id).max().unwrap_or(start_from_id);
    let groups = group_files_by_size(files, max_group_bytes);
    debug!(
        "✅ Fetched {} group(s) for set {}, cursor {} -> {}",
        groups.len(),
        backup_set_id,
        start_from_id,
        cursor
    );
    Ok((groups, cursor))
}

/// Rows returned by one defensive full sweep
const SWEEP_BATCH_LIMIT: i64 = 10000;

/// Defensive full sweep: the ids of pending regular files of the set,
/// regardless of the cursor. Runs under a long statement timeout because
/// large sets make this expensive.
#[instrument(level = "debug", skip(pool))]
pub async fn sweep_pending_files(
    pool: &PgPool,
    backup_set_id: i64,
    timeout_secs: u64,
) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;

    sqlx::query(&format!("SET LOCAL statement_timeout = '{}s'", timeout_secs))
        .execute(&mut *tx)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT id
        FROM backup_files
        WHERE backup_set_id = $1
          AND is_copy_success IS NOT TRUE
          AND file_type = 'file'
        ORDER BY id
        LIMIT $2
        "#,
    )
    .bind(backup_set_id)
    .bind(SWEEP_BATCH_LIMIT)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    rows.iter()
        .map(|row| row.try_get::<i64, _>("id").map_err(Into::into))
        .collect()
}

/// Mark a group of files as copied into an archive. A single bulk statement;
/// re-marking already-marked files is a no-op, so the call is idempotent.
#[instrument(level = "debug", skip(pool, file_paths))]
pub async fn mark_files_as_copied(
    pool: &PgPool,
    backup_set_id: i64,
    file_paths: &[String],
    chunk_number: Option<i32>,
) -> Result<u64> {
    if file_paths.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE backup_files
        SET is_copy_success = TRUE,
            copy_status_at = NOW(),
            chunk_number = COALESCE($3, chunk_number)
        WHERE backup_set_id = $1
          AND file_path = ANY($2)
          AND is_copy_success IS NOT TRUE
        "#,
    )
    .bind(backup_set_id)
    .bind(file_paths)
    .bind(chunk_number)
    .execute(pool)
    .await?;

    debug!(
        "✅ Marked {} of {} file(s) copied for set {}",
        result.rows_affected(),
        file_paths.len(),
        backup_set_id
    );
    Ok(result.rows_affected())
}

/// Record one finished archive in a single transaction: mark its files
/// copied and fold the group's sizes into the execution's progress counters.
#[instrument(level = "debug", skip(pool, file_paths))]
#[allow(clippy::too_many_arguments)]
pub async fn complete_group(
    pool: &PgPool,
    backup_set_id: i64,
    backup_task_id: i64,
    file_paths: &[String],
    chunk_number: i32,
    group_bytes: i64,
    compressed_bytes: i64,
) -> Result<u64> {
    let mut tx = pool.begin().await?;

    let marked = sqlx::query(
        r#"
        UPDATE backup_files
        SET is_copy_success = TRUE,
            copy_status_at = NOW(),
            chunk_number = COALESCE($3, chunk_number)
        WHERE backup_set_id = $1
          AND file_path = ANY($2)
          AND is_copy_success IS NOT TRUE
        "#,
    )
    .bind(backup_set_id)
    .bind(file_paths)
    .bind(chunk_number)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query(
        r#"
        UPDATE backup_tasks
        SET processed_files = processed_files + $2,
            processed_bytes = processed_bytes + $3,
            compressed_bytes = compressed_bytes + $4,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(backup_task_id)
    .bind(file_paths.len() as i64)
    .bind(group_bytes)
    .bind(compressed_bytes)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!(
        "✅ Chunk {} committed: {} file(s) marked for set {}",
        chunk_number, marked, backup_set_id
    );
    Ok(marked)
}

/// Record a scanned file. Duplicate `(backup_set_id, file_path)` rows are
/// ignored, keeping at most one row per path.
#[instrument(level = "debug", skip(pool, file), fields(file_path = %file.file_path))]
pub async fn upsert_backup_file(pool: &PgPool, file: &NewBackupFile) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO backup_files
            (backup_set_id, file_path, file_name, directory_path,
             file_type, file_size, modified_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (backup_set_id, file_path) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(file.backup_set_id)
    .bind(&file.file_path)
    .bind(&file.file_name)
    .bind(&file.directory_path)
    .bind(file.file_type.as_str())
    .bind(file.file_size)
    .bind(file.modified_time)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row.try_get("id")?),
        None => {
            let row = sqlx::query(
                "SELECT id FROM backup_files WHERE backup_set_id = $1 AND file_path = $2",
            )
            .bind(file.backup_set_id)
            .bind(&file.file_path)
            .fetch_one(pool)
            .await?;
            Ok(row.try_get("id")?)
        }
    }
}

/// Count files still pending for a set
#[instrument(level = "debug", skip(pool))]
pub async fn count_pending_files(pool: &PgPool, backup_set_id: i64) -> Result<i64> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS pending
        FROM backup_files
        WHERE backup_set_id = $1 AND is_copy_success IS NOT TRUE
        "#,
    )
    .bind(backup_set_id)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("pending")?)
}

/// List the files of a set, id order
#[instrument(level = "debug", skip(pool))]
pub async fn list_backup_files(pool: &PgPool, backup_set_id: i64) -> Result<Vec<BackupFile>> {
    let rows = sqlx::query("SELECT * FROM backup_files WHERE backup_set_id = $1 ORDER BY id")
        .bind(backup_set_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(BackupFile::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, size: i64) -> FileRecord {
        FileRecord {
            id,
            file_path: format!("/data/file-{}", id),
            file_name: format!("file-{}", id),
            directory_path: "/data".to_string(),
            file_type: FileKind::File,
            file_size: size,
            modified_time: None,
        }
    }

    #[test]
    fn test_grouping_respects_budget() {
        let files = vec![record(1, 40), record(2, 40), record(3, 40), record(4, 10)];
        let groups = group_files_by_size(files, 100);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].iter().map(|f| f.id).collect::<Vec<_>>(), [1, 2]);
        assert_eq!(groups[1].iter().map(|f| f.id).collect::<Vec<_>>(), [3, 4]);
    }

    #[test]
    fn test_oversize_file_is_singleton_group() {
        let files = vec![record(1, 10), record(2, 500), record(3, 10)];
        let groups = group_files_by_size(files, 100);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[1][0].id, 2);
        assert_eq!(groups[2][0].id, 3);
    }

    #[test]
    fn test_grouping_preserves_id_order() {
        let files = (1..=10).map(|i| record(i, 30)).collect();
        let groups = group_files_by_size(files, 100);

        let flattened: Vec<i64> = groups.into_iter().flatten().map(|f| f.id).collect();
        assert_eq!(flattened, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_input_yields_no_groups() {
        assert!(group_files_by_size(Vec::new(), 100).is_empty());
    }

    #[test]
    fn test_exact_budget_fits_one_group() {
        let files = vec![record(1, 50), record(2, 50)];
        let groups = group_files_by_size(files, 100);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }
}
