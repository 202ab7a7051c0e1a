//! Scheduler management endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tapeflow_core::{ActionKind, ScheduleType};
use tapeflow_db::models::{NewScheduledTask, ScheduledTask, ScheduledTaskPatch, TaskRun};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

fn default_metadata() -> Value {
    json!({})
}

fn default_tags() -> Value {
    json!([])
}

fn default_enabled() -> bool {
    true
}

/// Body of `POST /scheduler/tasks`
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub schedule_type: ScheduleType,
    #[serde(default = "default_metadata")]
    pub schedule_config: Value,
    pub action_type: ActionKind,
    #[serde(default = "default_metadata")]
    pub action_config: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metadata")]
    pub task_metadata: Value,
    #[serde(default = "default_tags")]
    pub tags: Value,
    #[serde(default)]
    pub backup_task_id: Option<i64>,
}

/// Body of `PUT /scheduler/tasks/{id}`; absent fields stay untouched
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub schedule_config: Option<Value>,
    pub action_type: Option<ActionKind>,
    pub action_config: Option<Value>,
    pub enabled: Option<bool>,
    pub task_metadata: Option<Value>,
    pub tags: Option<Value>,
    pub backup_task_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub enabled_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct TaskLogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    50
}

/// Body of `POST /scheduler/tasks/{id}/run`
#[derive(Debug, Default, Deserialize)]
pub struct RunTaskRequest {
    #[serde(default)]
    pub options: Option<Value>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Vec<ScheduledTask>>> {
    let tasks = state.scheduler.get_tasks(query.enabled_only).await?;
    Ok(Json(tasks))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Json<ScheduledTask>> {
    if request.task_name.trim().is_empty() {
        return Err(ApiError(tapeflow_core::TapeflowError::Validation(
            "task_name cannot be empty".into(),
        )));
    }

    let task = state
        .scheduler
        .add_task(NewScheduledTask {
            task_name: request.task_name,
            description: request.description,
            schedule_type: request.schedule_type,
            schedule_config: request.schedule_config,
            action_type: request.action_type,
            action_config: request.action_config,
            enabled: request.enabled,
            task_metadata: request.task_metadata,
            tags: request.tags,
            backup_task_id: request.backup_task_id,
        })
        .await?;
    Ok(Json(task))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ScheduledTask>> {
    let task = state
        .scheduler
        .get_task(id)
        .await?
        .ok_or_else(|| tapeflow_core::TapeflowError::NotFound(format!("scheduled task {}", id)))?;
    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateTaskRequest>,
) -> ApiResult<Json<ScheduledTask>> {
    let task = state
        .scheduler
        .update_task(
            id,
            ScheduledTaskPatch {
                task_name: request.task_name,
                description: request.description,
                schedule_type: request.schedule_type,
                schedule_config: request.schedule_config,
                action_type: request.action_type,
                action_config: request.action_config,
                enabled: request.enabled,
                status: None,
                task_metadata: request.task_metadata,
                tags: request.tags,
                backup_task_id: request.backup_task_id,
            },
        )
        .await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let deleted = state.scheduler.delete_task(id).await?;
    if !deleted {
        return Err(ApiError(tapeflow_core::TapeflowError::NotFound(format!(
            "scheduled task {}",
            id
        ))));
    }
    Ok(Json(json!({"deleted": true})))
}

pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    request: Option<Json<RunTaskRequest>>,
) -> ApiResult<Json<Value>> {
    let options = request.and_then(|Json(r)| r.options);
    let execution_id = state.scheduler.run_task_now(id, options).await?;
    Ok(Json(json!({"execution_id": execution_id})))
}

pub async fn stop_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let stopped = state.scheduler.stop_task(id).await?;
    Ok(Json(json!({"stopped": stopped})))
}

pub async fn enable_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ScheduledTask>> {
    Ok(Json(state.scheduler.enable_task(id).await?))
}

pub async fn disable_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ScheduledTask>> {
    Ok(Json(state.scheduler.disable_task(id).await?))
}

pub async fn unlock_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let unlocked = state.scheduler.unlock_task(id).await?;
    Ok(Json(json!({"unlocked": unlocked})))
}

pub async fn unlock_all(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let (locks_released, tasks_reset) = state.scheduler.unlock_all().await?;
    Ok(Json(json!({
        "locks_released": locks_released,
        "tasks_reset": tasks_reset,
    })))
}

pub async fn task_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TaskLogsQuery>,
) -> ApiResult<Json<Vec<TaskRun>>> {
    let runs = state.scheduler.task_runs(id, query.limit.clamp(1, 500)).await?;
    Ok(Json(runs))
}
