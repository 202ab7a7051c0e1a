//! Backup action handler
//!
//! Resolves the backup template a scheduled task points at, applies the
//! per-template concurrency guard, creates an execution record inheriting
//! the template's configuration and hands it to the backup engine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use tapeflow_backup::BackupEngine;
use tapeflow_core::{Result, TapeflowError};
use tapeflow_db::backup_tasks;
use tracing::{info, instrument, warn};

use super::{ActionContext, ActionHandler};

/// How long a running execution may sit before the guard assumes it is
/// stale and lets a new one through
const STALE_EXECUTION_HOURS: i64 = 24;

pub struct BackupActionHandler {
    pool: PgPool,
    engine: Arc<BackupEngine>,
}

impl BackupActionHandler {
    pub fn new(pool: PgPool, engine: Arc<BackupEngine>) -> Self {
        Self { pool, engine }
    }
}

/// Execution name: template name plus a launch timestamp
pub fn execution_task_name(template_name: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", template_name, at.format("%Y%m%d_%H%M%S"))
}

#[async_trait]
impl ActionHandler for BackupActionHandler {
    #[instrument(level = "debug", skip(self, ctx), fields(task = %ctx.task.task_name))]
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value> {
        let template_id = ctx.task.backup_template_id().ok_or_else(|| {
            TapeflowError::Validation(format!(
                "scheduled task {} has no backup template reference",
                ctx.task.task_name
            ))
        })?;

        let template = backup_tasks::get_backup_task(&self.pool, template_id)
            .await?
            .ok_or_else(|| {
                TapeflowError::NotFound(format!("backup template {}", template_id))
            })?;
        if !template.is_template {
            return Err(TapeflowError::Validation(format!(
                "backup task {} is not a template",
                template_id
            )));
        }

        // per-template concurrency guard: never launch a second execution
        // of the same template
        if let Some(running) = backup_tasks::find_running_execution(&self.pool, template_id).await?
        {
            let now = Utc::now();
            let ran_today = ctx
                .task
                .last_run_time
                .map(|t| t.date_naive() == now.date_naive())
                .unwrap_or(false);
            if ran_today {
                info!(
                    "⏭️ Template {} already has execution {} running today, skipping",
                    template_id, running.id
                );
                return Ok(json!({
                    "status": "skipped",
                    "running_task_id": running.id,
                }));
            }

            let stale = running
                .started_at
                .map(|s| now - s > Duration::hours(STALE_EXECUTION_HOURS))
                .unwrap_or(true);
            if stale {
                warn!(
                    "⚠️ Execution {} of template {} has been running over {}h, proceeding anyway",
                    running.id, template_id, STALE_EXECUTION_HOURS
                );
            } else {
                info!(
                    "⏭️ Template {} already has execution {} running, skipping",
                    template_id, running.id
                );
                return Ok(json!({
                    "status": "skipped",
                    "running_task_id": running.id,
                }));
            }
        }

        let name = execution_task_name(&template.task_name, Utc::now());
        let execution =
            backup_tasks::create_execution_from_template(&self.pool, &template, &name).await?;

        info!(
            "🚀 Launching backup execution {} from template {} (manual: {})",
            execution.id, template_id, ctx.manual_run
        );

        let outcome = self
            .engine
            .run_execution(execution.id, ctx.cancel.child_token())
            .await?;

        Ok(outcome.to_result(execution.id, Some(template_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_task_name_format() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T02:15:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            execution_task_name("monthly-docs", at),
            "monthly-docs-20260301_021530"
        );
    }
}
