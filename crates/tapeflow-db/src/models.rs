//! Row models for TapeFlow
//!
//! Structs mirroring the tables in `migrations.rs`, with manual `PgRow`
//! mapping. Enum columns are lowercase text parsed through the shared
//! `FromStr` impls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;
use tapeflow_core::{
    ActionKind, BackupSetStatus, BackupTaskStatus, BackupTaskType, FileKind, OperationStage,
    Result, RunStatus, ScanStatus, ScheduleType, ScheduledTaskStatus, TapeStatus, TapeflowError,
};
use uuid::Uuid;

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr<Err = TapeflowError>,
{
    let text: String = row.try_get(column)?;
    text.parse()
}

fn parse_optional_column<T>(row: &PgRow, column: &str) -> Result<Option<T>>
where
    T: FromStr<Err = TapeflowError>,
{
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| t.parse()).transpose()
}

/// A durable schedule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub task_name: String,
    pub description: Option<String>,
    pub status: ScheduledTaskStatus,
    pub schedule_type: ScheduleType,
    pub schedule_config: Value,
    pub action_type: ActionKind,
    pub action_config: Value,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub total_runs: i32,
    pub success_runs: i32,
    pub failure_runs: i32,
    pub average_duration: Option<i32>,
    pub last_error: Option<String>,
    pub enabled: bool,
    pub task_metadata: Value,
    pub tags: Value,
    pub backup_task_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            task_name: row.try_get("task_name")?,
            description: row.try_get("description")?,
            status: parse_column(row, "status")?,
            schedule_type: parse_column(row, "schedule_type")?,
            schedule_config: row.try_get("schedule_config")?,
            action_type: parse_column(row, "action_type")?,
            action_config: row.try_get("action_config")?,
            next_run_time: row.try_get("next_run_time")?,
            last_run_time: row.try_get("last_run_time")?,
            last_success_time: row.try_get("last_success_time")?,
            last_failure_time: row.try_get("last_failure_time")?,
            total_runs: row.try_get("total_runs")?,
            success_runs: row.try_get("success_runs")?,
            failure_runs: row.try_get("failure_runs")?,
            average_duration: row.try_get("average_duration")?,
            last_error: row.try_get("last_error")?,
            enabled: row.try_get("enabled")?,
            task_metadata: row.try_get("task_metadata")?,
            tags: row.try_get("tags")?,
            backup_task_id: row.try_get("backup_task_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Template id from either the dedicated column or legacy task metadata
    pub fn backup_template_id(&self) -> Option<i64> {
        self.backup_task_id.or_else(|| {
            self.task_metadata
                .get("backup_task_id")
                .and_then(Value::as_i64)
        })
    }
}

/// Fields accepted when creating a scheduled task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledTask {
    pub task_name: String,
    pub description: Option<String>,
    pub schedule_type: ScheduleType,
    pub schedule_config: Value,
    pub action_type: ActionKind,
    pub action_config: Value,
    pub enabled: bool,
    pub task_metadata: Value,
    pub tags: Value,
    pub backup_task_id: Option<i64>,
}

/// Patchable fields of a scheduled task; `None` leaves the column untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledTaskPatch {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub schedule_config: Option<Value>,
    pub action_type: Option<ActionKind>,
    pub action_config: Option<Value>,
    pub enabled: Option<bool>,
    pub status: Option<ScheduledTaskStatus>,
    pub task_metadata: Option<Value>,
    pub tags: Option<Value>,
    pub backup_task_id: Option<i64>,
}

/// Mutex row over a single scheduled task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLock {
    pub id: i64,
    pub task_id: i64,
    pub execution_id: Uuid,
    pub locked_at: DateTime<Utc>,
    pub is_active: bool,
}

impl TaskLock {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            execution_id: row.try_get("execution_id")?,
            locked_at: row.try_get("locked_at")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

/// One execution attempt of a scheduled task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub task_id: i64,
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
    pub status: RunStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
}

impl TaskRun {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            execution_id: row.try_get("execution_id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration: row.try_get("duration")?,
            status: parse_column(row, "status")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

/// A backup template (`is_template`) or execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTask {
    pub id: i64,
    pub task_name: String,
    pub task_type: BackupTaskType,
    pub description: Option<String>,
    pub status: BackupTaskStatus,
    pub is_template: bool,
    pub template_id: Option<i64>,
    pub source_paths: Value,
    pub exclude_patterns: Value,
    pub compression_enabled: bool,
    pub encryption_enabled: bool,
    pub retention_days: i32,
    pub tape_device: Option<String>,
    pub tape_id: Option<String>,
    pub backup_set_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_files: i64,
    pub processed_files: i64,
    pub total_bytes: i64,
    pub processed_bytes: i64,
    pub compressed_bytes: i64,
    pub scan_status: ScanStatus,
    pub scan_completed_at: Option<DateTime<Utc>>,
    pub operation_stage: Option<OperationStage>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupTask {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            task_name: row.try_get("task_name")?,
            task_type: parse_column(row, "task_type")?,
            description: row.try_get("description")?,
            status: parse_column(row, "status")?,
            is_template: row.try_get("is_template")?,
            template_id: row.try_get("template_id")?,
            source_paths: row.try_get("source_paths")?,
            exclude_patterns: row.try_get("exclude_patterns")?,
            compression_enabled: row.try_get("compression_enabled")?,
            encryption_enabled: row.try_get("encryption_enabled")?,
            retention_days: row.try_get("retention_days")?,
            tape_device: row.try_get("tape_device")?,
            tape_id: row.try_get("tape_id")?,
            backup_set_id: row.try_get("backup_set_id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            total_files: row.try_get("total_files")?,
            processed_files: row.try_get("processed_files")?,
            total_bytes: row.try_get("total_bytes")?,
            processed_bytes: row.try_get("processed_bytes")?,
            compressed_bytes: row.try_get("compressed_bytes")?,
            scan_status: parse_column(row, "scan_status")?,
            scan_completed_at: row.try_get("scan_completed_at")?,
            operation_stage: parse_optional_column(row, "operation_stage")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Fields accepted when creating a backup template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBackupTemplate {
    pub task_name: String,
    pub task_type: BackupTaskType,
    pub description: Option<String>,
    pub source_paths: Value,
    pub exclude_patterns: Value,
    pub compression_enabled: bool,
    pub encryption_enabled: bool,
    pub retention_days: i32,
    pub tape_device: Option<String>,
}

/// Patchable fields of a backup template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupTemplatePatch {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub source_paths: Option<Value>,
    pub exclude_patterns: Option<Value>,
    pub compression_enabled: Option<bool>,
    pub encryption_enabled: Option<bool>,
    pub retention_days: Option<i32>,
    pub tape_device: Option<String>,
}

/// One completed archival unit written to one tape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSet {
    pub id: i64,
    pub set_id: String,
    pub set_name: String,
    pub backup_group: String,
    pub status: BackupSetStatus,
    pub backup_task_id: i64,
    pub tape_id: Option<String>,
    pub backup_type: BackupTaskType,
    pub backup_time: DateTime<Utc>,
    pub total_files: i64,
    pub total_bytes: i64,
    pub compressed_bytes: i64,
    pub compression_ratio: f64,
    pub retention_until: Option<DateTime<Utc>>,
    pub auto_delete: bool,
    pub created_at: DateTime<Utc>,
}

impl BackupSet {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            set_id: row.try_get("set_id")?,
            set_name: row.try_get("set_name")?,
            backup_group: row.try_get("backup_group")?,
            status: parse_column(row, "status")?,
            backup_task_id: row.try_get("backup_task_id")?,
            tape_id: row.try_get("tape_id")?,
            backup_type: parse_column(row, "backup_type")?,
            backup_time: row.try_get("backup_time")?,
            total_files: row.try_get("total_files")?,
            total_bytes: row.try_get("total_bytes")?,
            compressed_bytes: row.try_get("compressed_bytes")?,
            compression_ratio: row.try_get("compression_ratio")?,
            retention_until: row.try_get("retention_until")?,
            auto_delete: row.try_get("auto_delete")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Per-file record within a backup set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFile {
    pub id: i64,
    pub backup_set_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub directory_path: String,
    pub display_name: Option<String>,
    pub file_type: FileKind,
    pub file_size: i64,
    pub compressed_size: Option<i64>,
    pub modified_time: Option<DateTime<Utc>>,
    pub is_copy_success: Option<bool>,
    pub copy_status_at: Option<DateTime<Utc>>,
    pub chunk_number: Option<i32>,
    pub checksum: Option<String>,
}

impl BackupFile {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            backup_set_id: row.try_get("backup_set_id")?,
            file_path: row.try_get("file_path")?,
            file_name: row.try_get("file_name")?,
            directory_path: row.try_get("directory_path")?,
            display_name: row.try_get("display_name")?,
            file_type: parse_column(row, "file_type")?,
            file_size: row.try_get("file_size")?,
            compressed_size: row.try_get("compressed_size")?,
            modified_time: row.try_get("modified_time")?,
            is_copy_success: row.try_get("is_copy_success")?,
            copy_status_at: row.try_get("copy_status_at")?,
            chunk_number: row.try_get("chunk_number")?,
            checksum: row.try_get("checksum")?,
        })
    }
}

/// Lightweight pending-file row carried through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub directory_path: String,
    pub file_type: FileKind,
    pub file_size: i64,
    pub modified_time: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            file_path: row.try_get("file_path")?,
            file_name: row.try_get("file_name")?,
            directory_path: row.try_get("directory_path")?,
            file_type: parse_column(row, "file_type")?,
            file_size: row.try_get("file_size")?,
            modified_time: row.try_get("modified_time")?,
        })
    }
}

/// A tape cartridge known to the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeCartridge {
    pub id: i64,
    pub tape_id: String,
    pub label: Option<String>,
    pub serial_number: Option<String>,
    pub status: TapeStatus,
    pub capacity_bytes: i64,
    pub used_bytes: i64,
    pub backup_group: Option<String>,
    pub health_score: i32,
}

impl TapeCartridge {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            tape_id: row.try_get("tape_id")?,
            label: row.try_get("label")?,
            serial_number: row.try_get("serial_number")?,
            status: parse_column(row, "status")?,
            capacity_bytes: row.try_get("capacity_bytes")?,
            used_bytes: row.try_get("used_bytes")?,
            backup_group: row.try_get("backup_group")?,
            health_score: row.try_get("health_score")?,
        })
    }
}

/// Aggregate backup statistics for the management API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStatistics {
    pub total_executions: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total_bytes: i64,
    pub compressed_bytes: i64,
    pub total_files: i64,
}
