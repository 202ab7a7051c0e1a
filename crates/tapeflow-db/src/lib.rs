//! TapeFlow Persistence Layer
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.3.0
//!
//! PostgreSQL storage for the scheduler and the backup pipeline: scheduled
//! tasks, per-task execution locks, run records, backup templates and
//! executions, backup sets and per-file copy bookkeeping, the tape registry
//! and the audit logs.
//!
//! All queries are runtime-checked `sqlx::query` calls with manual row
//! mapping; enum columns are lowercase text.

#![forbid(unsafe_code)]

pub mod backup_files;
pub mod backup_sets;
pub mod backup_tasks;
pub mod locks;
pub mod logs;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod runs;
pub mod scheduled_tasks;
pub mod tapes;

pub use models::{
    BackupFile, BackupSet, BackupStatistics, BackupTask, BackupTemplatePatch, FileRecord,
    NewBackupTemplate, NewScheduledTask, ScheduledTask, ScheduledTaskPatch, TapeCartridge,
    TaskLock, TaskRun,
};
pub use pool::DatabasePool;
