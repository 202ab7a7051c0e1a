//! Backup pipeline driver
//!
//! Runs one backup execution end to end: creates the backup set, starts the
//! prefetcher and the compressor concurrently, waits for the end-of-stream
//! sentinel, then finalizes statistics. Cancellation is cooperative: the
//! stages observe the token at group boundaries, so an in-progress archive
//! always reaches `final/` or is cleanly removed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::postgres::PgPool;
use tapeflow_core::{
    BackupSetStatus, BackupTaskStatus, OperationStage, PipelineConfig, Result, TapeflowError,
};
use tapeflow_db::{backup_sets, backup_tasks};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::compressor::{CompressEnd, CompressorConfig, CompressorStage};
use crate::prefetcher::{spawn_prefetcher, PrefetcherConfig};
use crate::store::{DbPipelineStore, PipelineStore};

/// Result summary handed back to the action handler
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub backup_set_id: String,
    pub tape_id: Option<String>,
    pub total_files: i64,
    pub total_bytes: i64,
    pub processed_files: i64,
}

impl BackupOutcome {
    /// Render the handler result map
    pub fn to_result(&self, backup_task_id: i64, template_id: Option<i64>) -> serde_json::Value {
        json!({
            "status": "success",
            "backup_task_id": backup_task_id,
            "backup_set_id": self.backup_set_id,
            "tape_id": self.tape_id,
            "total_files": self.total_files,
            "total_bytes": self.total_bytes,
            "processed_files": self.processed_files,
            "template_id": template_id,
        })
    }
}

/// The backup engine owns the pipeline configuration and runs executions
pub struct BackupEngine {
    pool: PgPool,
    store: Arc<dyn PipelineStore>,
    config: PipelineConfig,
}

impl BackupEngine {
    pub fn new(pool: PgPool, config: PipelineConfig, sweep_timeout_secs: u64) -> Self {
        let store = Arc::new(DbPipelineStore::new(pool.clone(), sweep_timeout_secs));
        Self {
            pool,
            store,
            config,
        }
    }

    /// Shared store handle for the tape mover scanner
    pub fn store(&self) -> Arc<dyn PipelineStore> {
        self.store.clone()
    }

    /// Run one backup execution record through the pipeline
    #[instrument(level = "debug", skip(self, cancel))]
    pub async fn run_execution(
        &self,
        execution_id: i64,
        cancel: CancellationToken,
    ) -> Result<BackupOutcome> {
        let execution = backup_tasks::get_backup_task(&self.pool, execution_id)
            .await?
            .ok_or_else(|| {
                TapeflowError::NotFound(format!("backup execution {}", execution_id))
            })?;
        if execution.is_template {
            return Err(TapeflowError::Validation(format!(
                "backup task {} is a template, not an execution",
                execution_id
            )));
        }

        let started_at = Utc::now();
        let set_id = format!("bs{}-{}", execution.id, started_at.format("%Y%m%d%H%M%S"));
        info!(
            "🚀 Backup execution {} starting with set {}",
            execution.id, set_id
        );

        let backup_set = backup_sets::create_backup_set(
            &self.pool,
            &set_id,
            &execution.task_name,
            execution.id,
            execution.task_type,
            started_at,
            execution.retention_days,
        )
        .await?;

        backup_tasks::mark_execution_started(&self.pool, execution.id, &set_id, started_at)
            .await?;

        tokio::fs::create_dir_all(self.config.work_dir(&set_id)).await?;
        tokio::fs::create_dir_all(self.config.final_dir(&set_id)).await?;

        let prefetch_cancel = cancel.child_token();
        let mut handle = spawn_prefetcher(
            self.store.clone(),
            backup_set.id,
            execution.id,
            PrefetcherConfig {
                max_group_bytes: self.config.max_group_bytes,
                sweep_interval: Duration::from_secs(self.config.sweep_interval_secs),
                ..Default::default()
            },
            prefetch_cancel.clone(),
        );

        backup_tasks::set_operation_stage(&self.pool, execution.id, OperationStage::Compress)
            .await?;

        let mut compressor = CompressorStage::new(
            self.store.clone(),
            CompressorConfig {
                codec: self.config.codec,
                work_dir: self.config.work_dir(&set_id),
                final_dir: self.config.final_dir(&set_id),
                retries: self.config.compress_retries,
                backoff: Duration::from_secs(self.config.compress_backoff_secs),
            },
            backup_set.id,
            execution.id,
        );

        let run = compressor.run(&mut handle, &cancel, &set_id).await;

        // the producer either pushed the sentinel and exited, or observes
        // the cancelled child token
        prefetch_cancel.cancel();
        let prefetch_stats = handle.join().await;
        info!(
            "🔧 Prefetcher finished for set {}: {} group(s) over {} loop(s)",
            set_id, prefetch_stats.prefetched_groups, prefetch_stats.loops
        );

        match run {
            Ok((stats, CompressEnd::Drained)) => {
                backup_tasks::set_operation_stage(&self.pool, execution.id, OperationStage::Finalize)
                    .await?;
                backup_sets::finalize_backup_set(
                    &self.pool,
                    backup_set.id,
                    BackupSetStatus::Active,
                    stats.files_processed as i64,
                    stats.bytes_processed as i64,
                    stats.bytes_compressed as i64,
                )
                .await?;
                backup_tasks::set_backup_task_status(
                    &self.pool,
                    execution.id,
                    BackupTaskStatus::Completed,
                    None,
                )
                .await?;

                let finished = backup_tasks::get_backup_task(&self.pool, execution.id)
                    .await?
                    .ok_or_else(|| {
                        TapeflowError::Internal(format!(
                            "backup execution {} vanished mid-run",
                            execution.id
                        ))
                    })?;

                info!(
                    "✅ Backup execution {} completed: {} file(s), {} bytes compressed to {}",
                    execution.id,
                    stats.files_processed,
                    stats.bytes_processed,
                    stats.bytes_compressed
                );
                Ok(BackupOutcome {
                    backup_set_id: set_id,
                    tape_id: finished.tape_id,
                    total_files: finished.total_files,
                    total_bytes: finished.total_bytes,
                    processed_files: finished.processed_files,
                })
            }
            Ok((stats, CompressEnd::Stopped)) => {
                warn!(
                    "🛑 Backup execution {} stopped after {} archive(s)",
                    execution.id, stats.archives_written
                );
                backup_tasks::set_backup_task_status(
                    &self.pool,
                    execution.id,
                    BackupTaskStatus::Cancelled,
                    None,
                )
                .await?;
                Err(TapeflowError::Conflict(format!(
                    "backup execution {} cancelled",
                    execution.id
                )))
            }
            Err(e) => {
                error!("❌ Backup execution {} failed: {}", execution.id, e);
                if let Err(status_err) = backup_tasks::set_backup_task_status(
                    &self.pool,
                    execution.id,
                    BackupTaskStatus::Failed,
                    Some(&e.to_string()),
                )
                .await
                {
                    error!(
                        "❌ Could not record failure of execution {}: {}",
                        execution.id, status_err
                    );
                }
                Err(e)
            }
        }
    }
}
