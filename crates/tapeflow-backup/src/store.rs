//! Pipeline storage seam
//!
//! The prefetcher, compressor and mover talk to storage through this trait
//! so the stages can be exercised against an in-memory store. Production
//! wires `DbPipelineStore`, which delegates to the persistence layer.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use tapeflow_core::{retry, Result, RetryPolicy, ScanStatus};
use tapeflow_db::models::{BackupSet, FileRecord};
use tapeflow_db::{backup_files, backup_sets, backup_tasks};

/// Storage operations the pipeline stages need
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Next batch of pending files, grouped by size budget; returns the new
    /// cursor (`0` signals a cursor anomaly and a restart from the start)
    async fn fetch_pending_groups(
        &self,
        backup_set_pk: i64,
        max_group_bytes: i64,
        start_from_id: i64,
        wait_if_small: bool,
    ) -> Result<(Vec<Vec<FileRecord>>, i64)>;

    /// Defensive full sweep: ids of files of the set still pending,
    /// regardless of cursor
    async fn sweep_pending(&self, backup_set_pk: i64) -> Result<Vec<i64>>;

    /// Read the external file-scanner's handshake state
    async fn scan_status(&self, backup_task_id: i64) -> Result<ScanStatus>;

    /// Idempotent bulk mark-copied for one archive's files
    async fn mark_files_copied(
        &self,
        backup_set_pk: i64,
        file_paths: &[String],
        chunk_number: i32,
    ) -> Result<u64>;

    /// Record one finished archive atomically: mark its files copied and
    /// fold the group into the execution's progress counters
    #[allow(clippy::too_many_arguments)]
    async fn complete_group(
        &self,
        backup_set_pk: i64,
        backup_task_id: i64,
        file_paths: &[String],
        chunk_number: i32,
        group_bytes: i64,
        compressed_bytes: i64,
    ) -> Result<u64>;

    /// Backup set lookup by staging directory name
    async fn set_by_set_id(&self, set_id: &str) -> Result<Option<BackupSet>>;
}

/// Production store backed by the PostgreSQL persistence layer
#[derive(Debug, Clone)]
pub struct DbPipelineStore {
    pool: PgPool,
    sweep_timeout_secs: u64,
}

impl DbPipelineStore {
    pub fn new(pool: PgPool, sweep_timeout_secs: u64) -> Self {
        Self {
            pool,
            sweep_timeout_secs,
        }
    }
}

#[async_trait]
impl PipelineStore for DbPipelineStore {
    async fn fetch_pending_groups(
        &self,
        backup_set_pk: i64,
        max_group_bytes: i64,
        start_from_id: i64,
        wait_if_small: bool,
    ) -> Result<(Vec<Vec<FileRecord>>, i64)> {
        backup_files::fetch_pending_files_grouped_by_size(
            &self.pool,
            backup_set_pk,
            max_group_bytes,
            start_from_id,
            wait_if_small,
        )
        .await
    }

    async fn sweep_pending(&self, backup_set_pk: i64) -> Result<Vec<i64>> {
        backup_files::sweep_pending_files(&self.pool, backup_set_pk, self.sweep_timeout_secs).await
    }

    async fn scan_status(&self, backup_task_id: i64) -> Result<ScanStatus> {
        backup_tasks::get_scan_status(&self.pool, backup_task_id).await
    }

    async fn mark_files_copied(
        &self,
        backup_set_pk: i64,
        file_paths: &[String],
        chunk_number: i32,
    ) -> Result<u64> {
        backup_files::mark_files_as_copied(&self.pool, backup_set_pk, file_paths, Some(chunk_number))
            .await
    }

    async fn complete_group(
        &self,
        backup_set_pk: i64,
        backup_task_id: i64,
        file_paths: &[String],
        chunk_number: i32,
        group_bytes: i64,
        compressed_bytes: i64,
    ) -> Result<u64> {
        // the commit is idempotent (the mark filters on not-yet-copied), so
        // transient store failures can simply be retried
        retry(RetryPolicy::default(), "complete_group", || {
            backup_files::complete_group(
                &self.pool,
                backup_set_pk,
                backup_task_id,
                file_paths,
                chunk_number,
                group_bytes,
                compressed_bytes,
            )
        })
        .await
    }

    async fn set_by_set_id(&self, set_id: &str) -> Result<Option<BackupSet>> {
        backup_sets::get_backup_set_by_set_id(&self.pool, set_id).await
    }
}
