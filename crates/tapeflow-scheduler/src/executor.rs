//! Execution lifecycle
//!
//! One spawned future per firing task: take the per-task lock, write the run
//! record, flip the task to running, dispatch to the action handler, then
//! fold the outcome into the task's counters. The lock is released on every
//! exit path; bookkeeping failures are logged and never escape the
//! execution boundary.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPool;
use tapeflow_core::{RunStatus, ScheduledTaskStatus};
use tapeflow_db::logs::{log_operation, log_system, LogLevel, OperationLogEntry};
use tapeflow_db::models::ScheduledTask;
use tapeflow_db::{locks, runs, scheduled_tasks};
use tapeflow_notify::Notifier;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::actions::{ActionContext, ActionRegistry};
use crate::calculator::calculate_next_run_time;

/// Collaborators every execution needs
pub struct ExecutorDeps {
    pub pool: PgPool,
    pub registry: ActionRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub notify_on_success: bool,
}

/// Run one execution attempt of a scheduled task to completion
#[instrument(level = "debug", skip(deps, task, run_options, cancel), fields(task = %task.task_name, execution = %execution_id))]
pub async fn execute_task(
    deps: Arc<ExecutorDeps>,
    task: ScheduledTask,
    execution_id: Uuid,
    manual_run: bool,
    run_options: Option<Value>,
    cancel: CancellationToken,
) {
    let pool = &deps.pool;

    // lock acquisition fails closed: an error is treated like a held lock
    match locks::acquire_task_lock(pool, task.id, execution_id).await {
        Ok(true) => {}
        Ok(false) => {
            info!(
                "⏭️ Task {} skipped — already running (execution {})",
                task.task_name, execution_id
            );
            log_system(
                pool,
                LogLevel::Info,
                "scheduler",
                "task skipped — already running",
                "scheduler",
                "execute_task",
                Some(task.id),
                Some(serde_json::json!({"execution_id": execution_id})),
            )
            .await;
            return;
        }
        Err(e) => {
            error!(
                "❌ Lock acquisition failed for task {} (treating as held): {}",
                task.task_name, e
            );
            return;
        }
    }

    run_locked(&deps, &task, execution_id, manual_run, run_options, &cancel).await;

    // guaranteed release, even after cancellation or handler failure
    if let Err(e) = locks::release_task_lock(pool, task.id, execution_id).await {
        error!(
            "❌ Lock release failed for task {} ({}): {}",
            task.task_name, execution_id, e
        );
    } else {
        debug!("🔓 Lock released for task {} ({})", task.task_name, execution_id);
    }
}

async fn run_locked(
    deps: &ExecutorDeps,
    task: &ScheduledTask,
    execution_id: Uuid,
    manual_run: bool,
    run_options: Option<Value>,
    cancel: &CancellationToken,
) {
    let pool = &deps.pool;
    let started_at = Utc::now();

    if let Err(e) = runs::record_run_start(pool, task.id, execution_id, started_at).await {
        warn!("⚠️ Could not record run start for {}: {}", task.task_name, e);
    }
    if let Err(e) = scheduled_tasks::mark_task_running(pool, task.id, started_at).await {
        warn!("⚠️ Could not mark task {} running: {}", task.task_name, e);
    }

    log_operation(
        pool,
        &OperationLogEntry {
            operation_type: "scheduler_run".to_string(),
            resource_type: "scheduler".to_string(),
            resource_id: Some(task.id.to_string()),
            resource_name: Some(task.task_name.clone()),
            operation_name: "execute scheduled task".to_string(),
            operation_description: Some(format!("executing scheduled task {}", task.task_name)),
            category: Some("scheduler".to_string()),
            success: true,
            result_message: Some(format!("execution started ({})", execution_id)),
            ..Default::default()
        },
    )
    .await;

    let outcome = dispatch(deps, task, manual_run, run_options.as_ref(), cancel).await;

    let completed_at = Utc::now();
    let duration_ms = (completed_at - started_at).num_milliseconds().max(0);
    let duration_secs = (duration_ms / 1000) as i32;

    if cancel.is_cancelled() {
        info!(
            "🛑 Task {} execution {} cancelled after {}ms",
            task.task_name, execution_id, duration_ms
        );
        if let Err(e) = runs::record_run_end(
            pool,
            execution_id,
            completed_at,
            RunStatus::Cancelled,
            None,
            Some("cancelled by operator"),
        )
        .await
        {
            warn!("⚠️ Could not record cancelled run end: {}", e);
        }
        if let Err(e) =
            scheduled_tasks::set_task_status(pool, task.id, ScheduledTaskStatus::Paused).await
        {
            warn!("⚠️ Could not pause task {}: {}", task.task_name, e);
        }
        return;
    }

    match outcome {
        Ok(result) => {
            // compute the next fire time as if the success were already
            // recorded (the monthly fast path keys on last_success_time)
            let mut advanced = task.clone();
            advanced.last_run_time = Some(started_at);
            advanced.last_success_time = Some(completed_at);
            let next_run = match calculate_next_run_time(&advanced, completed_at) {
                Ok(next) => next,
                Err(e) => {
                    warn!("⚠️ Next-run computation failed for {}: {}", task.task_name, e);
                    None
                }
            };

            if let Err(e) = runs::record_run_end(
                pool,
                execution_id,
                completed_at,
                RunStatus::Success,
                Some(&result),
                None,
            )
            .await
            {
                warn!("⚠️ Could not record run end for {}: {}", task.task_name, e);
            }
            if let Err(e) = scheduled_tasks::record_task_success(
                pool,
                task.id,
                completed_at,
                duration_secs,
                next_run,
            )
            .await
            {
                warn!("⚠️ Could not update counters for {}: {}", task.task_name, e);
            }

            info!(
                "✅ Task {} execution {} succeeded in {}ms, next run {:?}",
                task.task_name, execution_id, duration_ms, next_run
            );
            log_operation(
                pool,
                &OperationLogEntry {
                    operation_type: "scheduler_run".to_string(),
                    resource_type: "scheduler".to_string(),
                    resource_id: Some(task.id.to_string()),
                    resource_name: Some(task.task_name.clone()),
                    operation_name: "execute scheduled task".to_string(),
                    operation_description: Some(format!(
                        "scheduled task {} succeeded",
                        task.task_name
                    )),
                    category: Some("scheduler".to_string()),
                    success: true,
                    result_message: Some(format!(
                        "execution {} finished in {}ms",
                        execution_id, duration_ms
                    )),
                    duration_ms: Some(duration_ms),
                    ..Default::default()
                },
            )
            .await;

            if deps.notify_on_success {
                if let Err(e) = deps
                    .notifier
                    .notify_system(
                        "✅ Scheduled task succeeded",
                        &format!(
                            "Task {} finished in {:.2}s",
                            task.task_name,
                            duration_ms as f64 / 1000.0
                        ),
                    )
                    .await
                {
                    warn!("⚠️ Success notification failed: {}", e);
                }
            }
        }
        Err(e) => {
            let error_message = e.to_string();
            error!(
                "❌ Task {} execution {} failed after {}ms: {}",
                task.task_name, execution_id, duration_ms, error_message
            );

            let next_run = calculate_next_run_time(task, completed_at).unwrap_or(None);

            if let Err(e) = runs::record_run_end(
                pool,
                execution_id,
                completed_at,
                RunStatus::Failed,
                None,
                Some(&error_message),
            )
            .await
            {
                warn!("⚠️ Could not record run end for {}: {}", task.task_name, e);
            }
            if let Err(e) = scheduled_tasks::record_task_failure(
                pool,
                task.id,
                completed_at,
                &error_message,
                next_run,
            )
            .await
            {
                warn!("⚠️ Could not update counters for {}: {}", task.task_name, e);
            }

            log_system(
                pool,
                LogLevel::Error,
                "scheduler",
                &format!("scheduled task {} failed", task.task_name),
                "scheduler",
                "execute_task",
                Some(task.id),
                Some(serde_json::json!({
                    "execution_id": execution_id,
                    "error": error_message,
                    "duration_ms": duration_ms,
                })),
            )
            .await;

            if let Err(notify_err) = deps
                .notifier
                .notify_task_failure(
                    &task.task_name,
                    task.id,
                    &execution_id.to_string(),
                    &error_message,
                    duration_ms,
                )
                .await
            {
                warn!("⚠️ Failure notification failed: {}", notify_err);
            }
        }
    }
}

async fn dispatch(
    deps: &ExecutorDeps,
    task: &ScheduledTask,
    manual_run: bool,
    run_options: Option<&Value>,
    cancel: &CancellationToken,
) -> tapeflow_core::Result<Value> {
    let handler = deps.registry.get(task.action_type)?;
    let ctx = ActionContext {
        task,
        action_config: &task.action_config,
        manual_run,
        run_options,
        cancel,
    };
    handler.execute(ctx).await
}
