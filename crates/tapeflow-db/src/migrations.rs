//! Database migrations for TapeFlow
//!
//! This module provides database migration functionality for the TapeFlow
//! system. All statements are idempotent (`IF NOT EXISTS`) so migrations can
//! run on every startup.

use sqlx::migrate::MigrateDatabase;
use sqlx::postgres::PgPool;
use sqlx::Postgres;
use tapeflow_core::{Result, TapeflowError};
use tracing::{debug, info, instrument};

/// Migration version
pub const MIGRATION_VERSION: &str = "20260301000000";

/// Run database migrations
#[instrument(level = "debug", skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    debug!("🔧 Starting database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version TEXT PRIMARY KEY,
            applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| TapeflowError::Database(e.to_string()))?;

    let migrations = vec![
        // Scheduled tasks
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id BIGSERIAL PRIMARY KEY,
            task_name TEXT NOT NULL UNIQUE,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'inactive',
            schedule_type TEXT NOT NULL,
            schedule_config JSONB NOT NULL DEFAULT '{}'::jsonb,
            action_type TEXT NOT NULL,
            action_config JSONB NOT NULL DEFAULT '{}'::jsonb,
            next_run_time TIMESTAMP WITH TIME ZONE,
            last_run_time TIMESTAMP WITH TIME ZONE,
            last_success_time TIMESTAMP WITH TIME ZONE,
            last_failure_time TIMESTAMP WITH TIME ZONE,
            total_runs INTEGER NOT NULL DEFAULT 0,
            success_runs INTEGER NOT NULL DEFAULT 0,
            failure_runs INTEGER NOT NULL DEFAULT 0,
            average_duration INTEGER,
            last_error TEXT,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            task_metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            tags JSONB NOT NULL DEFAULT '[]'::jsonb,
            backup_task_id BIGINT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
        // Per-task execution locks; rows are kept for audit, is_active is
        // flipped on release
        r#"
        CREATE TABLE IF NOT EXISTS task_locks (
            id BIGSERIAL PRIMARY KEY,
            task_id BIGINT NOT NULL,
            execution_id UUID NOT NULL,
            locked_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_task_locks_active
            ON task_locks (task_id) WHERE is_active
        "#,
        // One row per execution attempt
        r#"
        CREATE TABLE IF NOT EXISTS task_runs (
            id BIGSERIAL PRIMARY KEY,
            task_id BIGINT NOT NULL,
            execution_id UUID NOT NULL UNIQUE,
            started_at TIMESTAMP WITH TIME ZONE NOT NULL,
            completed_at TIMESTAMP WITH TIME ZONE,
            duration INTEGER,
            status TEXT NOT NULL DEFAULT 'running',
            result JSONB,
            error_message TEXT
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_task_runs_task_started
            ON task_runs (task_id, started_at DESC)
        "#,
        // Backup tasks: templates (is_template) and execution records
        r#"
        CREATE TABLE IF NOT EXISTS backup_tasks (
            id BIGSERIAL PRIMARY KEY,
            task_name TEXT NOT NULL,
            task_type TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            is_template BOOLEAN NOT NULL DEFAULT FALSE,
            template_id BIGINT REFERENCES backup_tasks(id),
            source_paths JSONB NOT NULL DEFAULT '[]'::jsonb,
            exclude_patterns JSONB NOT NULL DEFAULT '[]'::jsonb,
            compression_enabled BOOLEAN NOT NULL DEFAULT TRUE,
            encryption_enabled BOOLEAN NOT NULL DEFAULT FALSE,
            retention_days INTEGER NOT NULL DEFAULT 180,
            tape_device TEXT,
            tape_id TEXT,
            backup_set_id TEXT,
            started_at TIMESTAMP WITH TIME ZONE,
            completed_at TIMESTAMP WITH TIME ZONE,
            total_files BIGINT NOT NULL DEFAULT 0,
            processed_files BIGINT NOT NULL DEFAULT 0,
            total_bytes BIGINT NOT NULL DEFAULT 0,
            processed_bytes BIGINT NOT NULL DEFAULT 0,
            compressed_bytes BIGINT NOT NULL DEFAULT 0,
            scan_status TEXT NOT NULL DEFAULT 'pending',
            scan_completed_at TIMESTAMP WITH TIME ZONE,
            operation_stage TEXT,
            error_message TEXT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_backup_tasks_template_status
            ON backup_tasks (template_id, status)
        "#,
        // Backup sets: one archival unit per tape per execution
        r#"
        CREATE TABLE IF NOT EXISTS backup_sets (
            id BIGSERIAL PRIMARY KEY,
            set_id TEXT NOT NULL UNIQUE,
            set_name TEXT NOT NULL,
            backup_group TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            backup_task_id BIGINT NOT NULL REFERENCES backup_tasks(id),
            tape_id TEXT,
            backup_type TEXT NOT NULL,
            backup_time TIMESTAMP WITH TIME ZONE NOT NULL,
            total_files BIGINT NOT NULL DEFAULT 0,
            total_bytes BIGINT NOT NULL DEFAULT 0,
            compressed_bytes BIGINT NOT NULL DEFAULT 0,
            compression_ratio DOUBLE PRECISION NOT NULL DEFAULT 0,
            retention_until TIMESTAMP WITH TIME ZONE,
            auto_delete BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
        // Per-file bookkeeping. Path columns are TEXT: source trees contain
        // paths far beyond any varchar cap.
        r#"
        CREATE TABLE IF NOT EXISTS backup_files (
            id BIGSERIAL PRIMARY KEY,
            backup_set_id BIGINT NOT NULL REFERENCES backup_sets(id),
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            directory_path TEXT NOT NULL,
            display_name TEXT,
            file_type TEXT NOT NULL DEFAULT 'file',
            file_size BIGINT NOT NULL DEFAULT 0,
            compressed_size BIGINT,
            modified_time TIMESTAMP WITH TIME ZONE,
            is_copy_success BOOLEAN,
            copy_status_at TIMESTAMP WITH TIME ZONE,
            chunk_number INTEGER,
            checksum TEXT
        )
        "#,
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_backup_files_set_path
            ON backup_files (backup_set_id, file_path)
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_backup_files_pending
            ON backup_files (backup_set_id, is_copy_success)
            WHERE is_copy_success IS NOT TRUE
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_backup_files_pending_scan
            ON backup_files (backup_set_id, is_copy_success, file_type, id)
            WHERE is_copy_success IS NOT TRUE AND file_type = 'file'
        "#,
        // Tape cartridge registry
        r#"
        CREATE TABLE IF NOT EXISTS tape_cartridges (
            id BIGSERIAL PRIMARY KEY,
            tape_id TEXT NOT NULL UNIQUE,
            label TEXT,
            serial_number TEXT,
            status TEXT NOT NULL DEFAULT 'new',
            capacity_bytes BIGINT NOT NULL DEFAULT 0,
            used_bytes BIGINT NOT NULL DEFAULT 0,
            backup_group TEXT,
            health_score INTEGER NOT NULL DEFAULT 100,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
        // Structured system log
        r#"
        CREATE TABLE IF NOT EXISTS system_logs (
            id BIGSERIAL PRIMARY KEY,
            level TEXT NOT NULL,
            category TEXT NOT NULL,
            message TEXT NOT NULL,
            module TEXT,
            function TEXT,
            task_id BIGINT,
            details JSONB,
            exception_type TEXT,
            stack_trace TEXT,
            duration_ms BIGINT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
        // Operator-facing operation audit log
        r#"
        CREATE TABLE IF NOT EXISTS operation_logs (
            id BIGSERIAL PRIMARY KEY,
            operation_type TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT,
            resource_name TEXT,
            operation_name TEXT NOT NULL,
            operation_description TEXT,
            category TEXT,
            success BOOLEAN NOT NULL DEFAULT TRUE,
            result_message TEXT,
            error_message TEXT,
            duration_ms BIGINT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ];

    for migration in migrations {
        sqlx::query(migration)
            .execute(pool)
            .await
            .map_err(|e| TapeflowError::Database(e.to_string()))?;
    }

    sqlx::query(
        r#"
        INSERT INTO _migrations (version)
        VALUES ($1)
        ON CONFLICT (version) DO NOTHING
        "#,
    )
    .bind(MIGRATION_VERSION)
    .execute(pool)
    .await
    .map_err(|e| TapeflowError::Database(e.to_string()))?;

    info!("✅ Database migrations completed");
    Ok(())
}

/// Check if database exists
pub async fn database_exists(url: &str) -> Result<bool> {
    Postgres::database_exists(url)
        .await
        .map_err(|e| TapeflowError::Database(e.to_string()))
}

/// Create database if it doesn't exist
pub async fn create_database(url: &str) -> Result<()> {
    if !database_exists(url).await? {
        Postgres::create_database(url)
            .await
            .map_err(|e| TapeflowError::Database(e.to_string()))?;
    }
    Ok(())
}
