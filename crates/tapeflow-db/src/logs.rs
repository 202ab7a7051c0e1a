//! Operation and system log recording
//!
//! Two audit surfaces: `operation_logs` records operator-meaningful actions
//! (scheduler runs, task CRUD, unlocks), `system_logs` records structured
//! diagnostic events. Log writes never fail their caller; a broken audit
//! trail is logged and swallowed.

use serde_json::Value;
use sqlx::postgres::PgPool;
use tracing::{error, instrument};

/// Severity for system log rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// One operator-meaningful action
#[derive(Debug, Clone, Default)]
pub struct OperationLogEntry {
    pub operation_type: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub resource_name: Option<String>,
    pub operation_name: String,
    pub operation_description: Option<String>,
    pub category: Option<String>,
    pub success: bool,
    pub result_message: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

/// Write an operation-log row. Failures are logged, never propagated.
#[instrument(level = "debug", skip(pool, entry), fields(operation = %entry.operation_name))]
pub async fn log_operation(pool: &PgPool, entry: &OperationLogEntry) {
    let result = sqlx::query(
        r#"
        INSERT INTO operation_logs
            (operation_type, resource_type, resource_id, resource_name,
             operation_name, operation_description, category, success,
             result_message, error_message, duration_ms)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&entry.operation_type)
    .bind(&entry.resource_type)
    .bind(&entry.resource_id)
    .bind(&entry.resource_name)
    .bind(&entry.operation_name)
    .bind(&entry.operation_description)
    .bind(&entry.category)
    .bind(entry.success)
    .bind(&entry.result_message)
    .bind(&entry.error_message)
    .bind(entry.duration_ms)
    .execute(pool)
    .await;

    if let Err(e) = result {
        error!("❌ Failed to write operation log: {}", e);
    }
}

/// Write a system-log row. Failures are logged, never propagated.
#[allow(clippy::too_many_arguments)]
#[instrument(level = "debug", skip(pool, message, details))]
pub async fn log_system(
    pool: &PgPool,
    level: LogLevel,
    category: &str,
    message: &str,
    module: &str,
    function: &str,
    task_id: Option<i64>,
    details: Option<Value>,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO system_logs
            (level, category, message, module, function, task_id, details)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(level.as_str())
    .bind(category)
    .bind(message)
    .bind(module)
    .bind(function)
    .bind(task_id)
    .bind(details)
    .execute(pool)
    .await;

    if let Err(e) = result {
        error!("❌ Failed to write system log: {}", e);
    }
}
