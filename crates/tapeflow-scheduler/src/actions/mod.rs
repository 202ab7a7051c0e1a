//! Action dispatch
//!
//! Maps an `ActionKind` to its handler through an explicit registry. Unknown
//! kinds and malformed action configs fail with a validation error before
//! any side effects.

pub mod backup;
pub mod misc;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::PgPool;
use tapeflow_backup::BackupEngine;
use tapeflow_core::{ActionKind, Result, TapeflowError};
use tapeflow_db::models::ScheduledTask;
use tokio_util::sync::CancellationToken;

pub use backup::BackupActionHandler;
pub use misc::{
    CleanupHandler, CustomHandler, HealthCheckHandler, RecoveryHandler, RetentionCheckHandler,
};

/// Everything a handler gets to see about the firing task
pub struct ActionContext<'a> {
    pub task: &'a ScheduledTask,
    pub action_config: &'a Value,
    pub manual_run: bool,
    pub run_options: Option<&'a Value>,
    pub cancel: &'a CancellationToken,
}

/// One action implementation
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action; the returned value becomes the run record's result
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value>;
}

impl std::fmt::Debug for dyn ActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ActionHandler")
    }
}

/// Registry mapping action kinds to handlers
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler wired
    pub fn standard(pool: PgPool, engine: Arc<BackupEngine>, compress_dir: PathBuf) -> Self {
        let mut registry = Self::new();
        registry.register(
            ActionKind::Backup,
            Arc::new(BackupActionHandler::new(pool.clone(), engine)),
        );
        registry.register(
            ActionKind::HealthCheck,
            Arc::new(HealthCheckHandler::new(pool.clone(), compress_dir)),
        );
        registry.register(
            ActionKind::RetentionCheck,
            Arc::new(RetentionCheckHandler::new(pool.clone())),
        );
        registry.register(ActionKind::Cleanup, Arc::new(CleanupHandler::new(pool)));
        registry.register(ActionKind::Recovery, Arc::new(RecoveryHandler));
        registry.register(ActionKind::Custom, Arc::new(CustomHandler));
        registry
    }

    pub fn register(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Look up the handler for a kind; unknown kinds are a caller error
    pub fn get(&self, kind: ActionKind) -> Result<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned().ok_or_else(|| {
            TapeflowError::Validation(format!("no handler registered for action type {}", kind))
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecoveryActionConfig {
    #[allow(dead_code)]
    backup_set_id: String,
    #[allow(dead_code)]
    target_path: String,
}

#[derive(Debug, Deserialize)]
struct CleanupActionConfig {
    #[serde(default)]
    #[allow(dead_code)]
    retention_days: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct CustomActionConfig {
    #[allow(dead_code)]
    command: String,
    #[serde(default)]
    #[allow(dead_code)]
    args: Vec<String>,
}

/// Validate an action config against its kind's shape at the API boundary
pub fn validate_action_config(kind: ActionKind, config: &Value) -> Result<()> {
    let invalid =
        |e: &dyn std::fmt::Display| TapeflowError::Validation(format!("invalid {} action config: {}", kind, e));

    if !config.is_object() && !config.is_null() {
        return Err(invalid(&"config must be a JSON object"));
    }

    match kind {
        ActionKind::Backup | ActionKind::HealthCheck | ActionKind::RetentionCheck => Ok(()),
        ActionKind::Recovery => {
            serde_json::from_value::<RecoveryActionConfig>(config.clone())
                .map_err(|e| invalid(&e))?;
            Ok(())
        }
        ActionKind::Cleanup => {
            serde_json::from_value::<CleanupActionConfig>(config.clone())
                .map_err(|e| invalid(&e))?;
            Ok(())
        }
        ActionKind::Custom => {
            serde_json::from_value::<CustomActionConfig>(config.clone())
                .map_err(|e| invalid(&e))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_registry_rejects_everything() {
        let registry = ActionRegistry::new();
        let err = registry.get(ActionKind::Backup).unwrap_err();
        assert!(matches!(err, TapeflowError::Validation(_)));
        assert!(err.to_string().contains("backup"));
    }

    #[test]
    fn test_validate_action_configs() {
        assert!(validate_action_config(ActionKind::Backup, &json!({})).is_ok());
        assert!(validate_action_config(ActionKind::HealthCheck, &json!({})).is_ok());

        assert!(validate_action_config(
            ActionKind::Recovery,
            &json!({"backup_set_id": "bs-1", "target_path": "/restore"})
        )
        .is_ok());
        assert!(validate_action_config(ActionKind::Recovery, &json!({})).is_err());

        assert!(validate_action_config(
            ActionKind::Custom,
            &json!({"command": "sync-catalog", "args": ["--dry-run"]})
        )
        .is_ok());
        assert!(validate_action_config(ActionKind::Custom, &json!({})).is_err());

        assert!(validate_action_config(ActionKind::Cleanup, &json!({"retention_days": 90})).is_ok());
        assert!(validate_action_config(ActionKind::Cleanup, &json!("nope")).is_err());
    }
}
