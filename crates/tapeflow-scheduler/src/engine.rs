//! Scheduler engine
//!
//! Loads enabled tasks into an in-memory table, wakes on a fixed tick and
//! spawns an execution for every task whose `next_run_time` has arrived. The
//! tick loop never blocks on executions and a failure inside one execution
//! never reaches the loop. Double-firing is impossible even across
//! processes: every execution must win the per-task lock first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use tapeflow_core::{Result, ScheduledTaskStatus, TapeflowError};
use tapeflow_db::models::{NewScheduledTask, ScheduledTask, ScheduledTaskPatch, TaskRun};
use tapeflow_db::{locks, runs, scheduled_tasks};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::actions::{validate_action_config, ActionRegistry};
use crate::calculator::{calculate_next_run_time, validate_schedule_config};
use crate::executor::{execute_task, ExecutorDeps};
use crate::unlocker;

struct LoadedTask {
    task: ScheduledTask,
    next_run: DateTime<Utc>,
}

struct RunningExecution {
    execution_id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct EngineInner {
    pool: PgPool,
    tick: Duration,
    deps: Arc<ExecutorDeps>,
    tasks: RwLock<HashMap<i64, LoadedTask>>,
    running: Mutex<HashMap<i64, RunningExecution>>,
    shutdown: CancellationToken,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
}

/// The scheduled-task engine
#[derive(Clone)]
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
}

impl SchedulerEngine {
    pub fn new(
        pool: PgPool,
        tick: Duration,
        registry: ActionRegistry,
        notifier: Arc<dyn tapeflow_notify::Notifier>,
        notify_on_success: bool,
    ) -> Self {
        let deps = Arc::new(ExecutorDeps {
            pool: pool.clone(),
            registry,
            notifier,
            notify_on_success,
        });
        Self {
            inner: Arc::new(EngineInner {
                pool,
                tick,
                deps,
                tasks: RwLock::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tick_handle: Mutex::new(None),
            }),
        }
    }

    /// Reload every enabled task from persistence and compute fresh next-run
    /// times
    #[instrument(level = "debug", skip(self))]
    pub async fn initialize(&self) -> Result<usize> {
        let tasks = scheduled_tasks::list_scheduled_tasks(&self.inner.pool, true).await?;
        let mut loaded = 0;

        for task in tasks {
            if self.load_task(task).await.is_some() {
                loaded += 1;
            }
        }

        info!("✅ Scheduler initialized with {} task(s)", loaded);
        Ok(loaded)
    }

    /// Compute the task's next run, persist it and keep the task in memory.
    /// Returns `None` when the task will never fire again.
    async fn load_task(&self, task: ScheduledTask) -> Option<DateTime<Utc>> {
        let next_run = match calculate_next_run_time(&task, Utc::now()) {
            Ok(Some(next)) => next,
            Ok(None) => {
                debug!("Task {} has no future fire time, not loading", task.task_name);
                self.inner.tasks.write().await.remove(&task.id);
                if let Err(e) =
                    scheduled_tasks::set_next_run_time(&self.inner.pool, task.id, None).await
                {
                    warn!("⚠️ Could not clear next run for {}: {}", task.task_name, e);
                }
                return None;
            }
            Err(e) => {
                error!("❌ Could not schedule task {}: {}", task.task_name, e);
                return None;
            }
        };

        if let Err(e) =
            scheduled_tasks::set_next_run_time(&self.inner.pool, task.id, Some(next_run)).await
        {
            warn!("⚠️ Could not persist next run for {}: {}", task.task_name, e);
        }

        info!(
            "📅 Loaded task {} (ID: {}), next run {}",
            task.task_name, task.id, next_run
        );
        self.inner
            .tasks
            .write()
            .await
            .insert(task.id, LoadedTask { task, next_run });
        Some(next_run)
    }

    /// Start the tick loop
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&self) {
        let mut handle = self.inner.tick_handle.lock().await;
        if handle.is_some() {
            warn!("⚠️ Scheduler tick loop already running");
            return;
        }

        let engine = self.clone();
        *handle = Some(tokio::spawn(async move {
            engine.tick_loop().await;
        }));
        info!("⏰ Scheduler started (tick {:?})", self.inner.tick);
    }

    async fn tick_loop(&self) {
        let mut interval = tokio::time::interval(self.inner.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let now = Utc::now();
            let due: Vec<ScheduledTask> = {
                let tasks = self.inner.tasks.read().await;
                tasks
                    .values()
                    .filter(|loaded| now >= loaded.next_run)
                    .map(|loaded| loaded.task.clone())
                    .collect()
            };

            for task in due {
                let task_id = task.id;
                debug!("⏰ Task {} is due", task.task_name);
                self.spawn_execution(task, false, None).await;

                // advance the in-memory fire time immediately so the next
                // tick does not double-fire; the executor persists the
                // authoritative value when the run finishes
                let mut tasks = self.inner.tasks.write().await;
                if let Some(loaded) = tasks.get_mut(&task_id) {
                    let mut advanced = loaded.task.clone();
                    advanced.last_run_time = Some(now);
                    match calculate_next_run_time(&advanced, now) {
                        Ok(Some(next)) => loaded.next_run = next,
                        Ok(None) => {
                            tasks.remove(&task_id);
                        }
                        Err(e) => {
                            error!("❌ Rescheduling task {} failed: {}", task_id, e);
                            tasks.remove(&task_id);
                        }
                    }
                }
            }
        }

        info!("🛑 Scheduler tick loop stopped");
    }

    /// Spawn one execution of a task. The running-table entry is removed by
    /// the execution itself when it resolves.
    async fn spawn_execution(
        &self,
        task: ScheduledTask,
        manual_run: bool,
        run_options: Option<Value>,
    ) -> Uuid {
        let execution_id = Uuid::new_v4();
        let cancel = self.inner.shutdown.child_token();
        let task_id = task.id;

        // holding the lock across spawn+insert keeps the cleanup inside the
        // execution from racing the insertion
        let mut running = self.inner.running.lock().await;
        let already_running = running.contains_key(&task_id);

        let deps = self.inner.deps.clone();
        let inner = self.inner.clone();
        let exec_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            execute_task(deps, task, execution_id, manual_run, run_options, exec_cancel).await;

            let mut running = inner.running.lock().await;
            if running
                .get(&task_id)
                .map(|entry| entry.execution_id == execution_id)
                .unwrap_or(false)
            {
                running.remove(&task_id);
            }
        });

        // a second launch while one is in flight will be refused by the
        // task lock; the table keeps tracking the first execution
        if !already_running {
            running.insert(
                task_id,
                RunningExecution {
                    execution_id,
                    cancel,
                    handle,
                },
            );
        }
        execution_id
    }

    /// Persist a new task and, if enabled, start scheduling it
    #[instrument(level = "debug", skip(self, task), fields(task_name = %task.task_name))]
    pub async fn add_task(&self, task: NewScheduledTask) -> Result<ScheduledTask> {
        validate_schedule_config(task.schedule_type, &task.schedule_config)?;
        validate_action_config(task.action_type, &task.action_config)?;
        // an action kind without a registered handler must fail at create
        // time, not at fire time
        self.inner.deps.registry.get(task.action_type)?;

        let created = scheduled_tasks::create_scheduled_task(&self.inner.pool, &task).await?;
        if created.enabled {
            self.load_task(created.clone()).await;
        }
        Ok(created)
    }

    /// Patch a task, recompute its schedule and refresh the in-memory entry
    #[instrument(level = "debug", skip(self, patch))]
    pub async fn update_task(
        &self,
        id: i64,
        patch: ScheduledTaskPatch,
    ) -> Result<ScheduledTask> {
        if let (Some(schedule_type), Some(config)) = (patch.schedule_type, &patch.schedule_config)
        {
            validate_schedule_config(schedule_type, config)?;
        }
        if let (Some(action_type), Some(config)) = (patch.action_type, &patch.action_config) {
            validate_action_config(action_type, config)?;
        }

        let updated = scheduled_tasks::update_scheduled_task(&self.inner.pool, id, &patch)
            .await?
            .ok_or_else(|| TapeflowError::NotFound(format!("scheduled task {}", id)))?;

        if updated.enabled {
            self.load_task(updated.clone()).await;
        } else {
            // disabling only stops future firing; an in-flight run finishes
            self.inner.tasks.write().await.remove(&id);
        }
        Ok(updated)
    }

    /// Cancel any in-flight run, drop lock rows and delete the task
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_task(&self, id: i64) -> Result<bool> {
        self.cancel_running(id).await;
        self.inner.tasks.write().await.remove(&id);

        locks::delete_locks_for_task(&self.inner.pool, id).await?;
        runs::delete_task_runs(&self.inner.pool, id).await?;
        scheduled_tasks::delete_scheduled_task(&self.inner.pool, id).await
    }

    /// Launch a task immediately, bypassing `next_run_time` but not the lock
    #[instrument(level = "debug", skip(self, run_options))]
    pub async fn run_task_now(&self, id: i64, run_options: Option<Value>) -> Result<Uuid> {
        let task = scheduled_tasks::get_scheduled_task(&self.inner.pool, id)
            .await?
            .ok_or_else(|| TapeflowError::NotFound(format!("scheduled task {}", id)))?;

        info!("▶️ Manual run requested for task {}", task.task_name);
        Ok(self.spawn_execution(task, true, run_options).await)
    }

    /// Cooperatively cancel the in-flight execution and pause the task
    #[instrument(level = "debug", skip(self))]
    pub async fn stop_task(&self, id: i64) -> Result<bool> {
        if !self.cancel_running(id).await {
            warn!("⚠️ Task {} has no running execution", id);
            return Ok(false);
        }
        scheduled_tasks::set_task_status(&self.inner.pool, id, ScheduledTaskStatus::Paused)
            .await?;
        info!("🛑 Task {} stopped", id);
        Ok(true)
    }

    async fn cancel_running(&self, id: i64) -> bool {
        let entry = self.inner.running.lock().await.remove(&id);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                if let Err(e) = entry.handle.await {
                    warn!("⚠️ Execution task join failed for {}: {}", id, e);
                }
                true
            }
            None => false,
        }
    }

    /// Enable a task and start scheduling it again
    pub async fn enable_task(&self, id: i64) -> Result<ScheduledTask> {
        self.update_task(
            id,
            ScheduledTaskPatch {
                enabled: Some(true),
                status: Some(ScheduledTaskStatus::Active),
                ..Default::default()
            },
        )
        .await
    }

    /// Disable a task; it stops firing but keeps its history
    pub async fn disable_task(&self, id: i64) -> Result<ScheduledTask> {
        self.update_task(
            id,
            ScheduledTaskPatch {
                enabled: Some(false),
                status: Some(ScheduledTaskStatus::Inactive),
                ..Default::default()
            },
        )
        .await
    }

    /// Operator recovery: force-release the task's lock and reset a stuck
    /// running status
    pub async fn unlock_task(&self, id: i64) -> Result<bool> {
        unlocker::unlock_task(&self.inner.pool, id).await
    }

    /// Operator recovery: release every lock and reset every stuck task
    pub async fn unlock_all(&self) -> Result<(u64, u64)> {
        unlocker::unlock_all(&self.inner.pool).await
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>> {
        scheduled_tasks::get_scheduled_task(&self.inner.pool, id).await
    }

    pub async fn get_tasks(&self, enabled_only: bool) -> Result<Vec<ScheduledTask>> {
        scheduled_tasks::list_scheduled_tasks(&self.inner.pool, enabled_only).await
    }

    pub async fn task_runs(&self, id: i64, limit: i64) -> Result<Vec<TaskRun>> {
        runs::list_task_runs(&self.inner.pool, id, limit).await
    }

    /// Whether a task currently has an in-flight execution in this process
    pub async fn is_running(&self, id: i64) -> bool {
        self.inner.running.lock().await.contains_key(&id)
    }

    /// Stop the tick loop and cooperatively cancel every running execution
    #[instrument(level = "debug", skip(self))]
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        if let Some(handle) = self.inner.tick_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("⚠️ Tick loop join failed: {}", e);
            }
        }

        let entries: Vec<RunningExecution> = {
            let mut running = self.inner.running.lock().await;
            running.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.cancel.cancel();
            if let Err(e) = entry.handle.await {
                warn!("⚠️ Execution join failed during shutdown: {}", e);
            }
        }

        info!("🛑 Scheduler shut down");
    }
}
