//! Backup task management endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tapeflow_core::{BackupTaskStatus, BackupTaskType, TapeflowError};
use tapeflow_db::backup_tasks::{self, BackupTaskFilter};
use tapeflow_db::models::{
    BackupStatistics, BackupTask, BackupTemplatePatch, NewBackupTemplate,
};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

fn default_true() -> bool {
    true
}

fn default_retention() -> i32 {
    180
}

/// Body of `POST /backup/tasks` (creates a template)
#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub task_name: String,
    pub task_type: BackupTaskType,
    #[serde(default)]
    pub description: Option<String>,
    pub source_paths: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub compression_enabled: bool,
    #[serde(default)]
    pub encryption_enabled: bool,
    #[serde(default = "default_retention")]
    pub retention_days: i32,
    #[serde(default)]
    pub tape_device: Option<String>,
}

/// Body of `PUT /backup/tasks/{id}` (template only)
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTemplateRequest {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub source_paths: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub compression_enabled: Option<bool>,
    pub encryption_enabled: Option<bool>,
    pub retention_days: Option<i32>,
    pub tape_device: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBackupTasksQuery {
    #[serde(default)]
    pub status: Option<BackupTaskStatus>,
    #[serde(default)]
    pub task_type: Option<BackupTaskType>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub templates_only: bool,
}

pub fn validate_create_template(request: &CreateTemplateRequest) -> Result<(), TapeflowError> {
    if request.task_name.trim().is_empty() {
        return Err(TapeflowError::Validation("task_name cannot be empty".into()));
    }
    if request.source_paths.is_empty() {
        return Err(TapeflowError::Validation(
            "source_paths must contain at least one path".into(),
        ));
    }
    if request.retention_days <= 0 {
        return Err(TapeflowError::Validation(
            "retention_days must be positive".into(),
        ));
    }
    Ok(())
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplateRequest>,
) -> ApiResult<Json<BackupTask>> {
    validate_create_template(&request)?;

    let template = backup_tasks::create_backup_template(
        &state.pool,
        &NewBackupTemplate {
            task_name: request.task_name,
            task_type: request.task_type,
            description: request.description,
            source_paths: json!(request.source_paths),
            exclude_patterns: json!(request.exclude_patterns),
            compression_enabled: request.compression_enabled,
            encryption_enabled: request.encryption_enabled,
            retention_days: request.retention_days,
            tape_device: request.tape_device,
        },
    )
    .await?;
    Ok(Json(template))
}

pub async fn list_backup_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListBackupTasksQuery>,
) -> ApiResult<Json<Vec<BackupTask>>> {
    let tasks = backup_tasks::list_backup_tasks(
        &state.pool,
        &BackupTaskFilter {
            status: query.status,
            task_type: query.task_type,
            name_like: query.name,
            templates_only: query.templates_only,
        },
    )
    .await?;
    Ok(Json(tasks))
}

pub async fn list_templates(State(state): State<AppState>) -> ApiResult<Json<Vec<BackupTask>>> {
    let templates = backup_tasks::list_backup_tasks(
        &state.pool,
        &BackupTaskFilter {
            templates_only: true,
            ..Default::default()
        },
    )
    .await?;
    Ok(Json(templates))
}

pub async fn get_backup_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<BackupTask>> {
    let task = backup_tasks::get_backup_task(&state.pool, id)
        .await?
        .ok_or_else(|| TapeflowError::NotFound(format!("backup task {}", id)))?;
    Ok(Json(task))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateTemplateRequest>,
) -> ApiResult<Json<BackupTask>> {
    let updated = backup_tasks::update_backup_template(
        &state.pool,
        id,
        &BackupTemplatePatch {
            task_name: request.task_name,
            description: request.description,
            source_paths: request.source_paths.map(|p| json!(p)),
            exclude_patterns: request.exclude_patterns.map(|p| json!(p)),
            compression_enabled: request.compression_enabled,
            encryption_enabled: request.encryption_enabled,
            retention_days: request.retention_days,
            tape_device: request.tape_device,
        },
    )
    .await?
    .ok_or_else(|| TapeflowError::NotFound(format!("backup task {}", id)))?;
    Ok(Json(updated))
}

pub async fn delete_backup_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let deleted = backup_tasks::delete_backup_task_cascade(&state.pool, id).await?;
    if !deleted {
        return Err(ApiError(TapeflowError::NotFound(format!(
            "backup task {}",
            id
        ))));
    }
    Ok(Json(json!({"deleted": true})))
}

pub async fn cancel_backup_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let cancelled = backup_tasks::cancel_backup_task(&state.pool, id).await?;
    if !cancelled {
        return Err(ApiError(TapeflowError::Conflict(format!(
            "backup task {} is not cancellable",
            id
        ))));
    }
    Ok(Json(json!({"cancelled": true})))
}

pub async fn statistics(State(state): State<AppState>) -> ApiResult<Json<BackupStatistics>> {
    let stats = backup_tasks::backup_statistics(&state.pool).await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CreateTemplateRequest {
        CreateTemplateRequest {
            task_name: "docs-full".to_string(),
            task_type: BackupTaskType::Full,
            description: None,
            source_paths: vec!["/srv/docs".to_string()],
            exclude_patterns: vec![],
            compression_enabled: true,
            encryption_enabled: false,
            retention_days: 180,
            tape_device: None,
        }
    }

    #[test]
    fn test_validate_create_template() {
        assert!(validate_create_template(&sample_request()).is_ok());

        let mut bad = sample_request();
        bad.task_name = "  ".to_string();
        assert!(validate_create_template(&bad).is_err());

        let mut bad = sample_request();
        bad.source_paths.clear();
        assert!(validate_create_template(&bad).is_err());

        let mut bad = sample_request();
        bad.retention_days = 0;
        assert!(validate_create_template(&bad).is_err());
    }
}
