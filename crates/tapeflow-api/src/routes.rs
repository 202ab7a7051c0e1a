//! API routes for TapeFlow
//!
//! Management surface under `/api/v1`: scheduler task CRUD and control,
//! backup template/execution management and statistics.

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::handlers::{backup, scheduler};
use crate::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Liveness
        .route("/health", get(health))
        // Scheduler routes
        .route(
            "/api/v1/scheduler/tasks",
            get(scheduler::list_tasks).post(scheduler::create_task),
        )
        .route("/api/v1/scheduler/tasks/unlock-all", post(scheduler::unlock_all))
        .route(
            "/api/v1/scheduler/tasks/:id",
            get(scheduler::get_task)
                .put(scheduler::update_task)
                .delete(scheduler::delete_task),
        )
        .route("/api/v1/scheduler/tasks/:id/run", post(scheduler::run_task))
        .route("/api/v1/scheduler/tasks/:id/stop", post(scheduler::stop_task))
        .route("/api/v1/scheduler/tasks/:id/enable", post(scheduler::enable_task))
        .route("/api/v1/scheduler/tasks/:id/disable", post(scheduler::disable_task))
        .route("/api/v1/scheduler/tasks/:id/unlock", post(scheduler::unlock_task))
        .route("/api/v1/scheduler/tasks/:id/logs", get(scheduler::task_logs))
        // Backup routes
        .route(
            "/api/v1/backup/tasks",
            get(backup::list_backup_tasks).post(backup::create_template),
        )
        .route(
            "/api/v1/backup/tasks/:id",
            get(backup::get_backup_task)
                .put(backup::update_template)
                .delete(backup::delete_backup_task),
        )
        .route("/api/v1/backup/tasks/:id/cancel", put(backup::cancel_backup_task))
        .route("/api/v1/backup/statistics", get(backup::statistics))
        .route("/api/v1/backup/templates", get(backup::list_templates))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn offline_state() -> AppState {
        let config = tapeflow_core::DatabaseConfig::default();
        let pool = tapeflow_db::DatabasePool::connect_lazy(&config).unwrap();
        let scheduler = tapeflow_scheduler::SchedulerEngine::new(
            pool.pool().clone(),
            Duration::from_secs(60),
            tapeflow_scheduler::ActionRegistry::new(),
            Arc::new(tapeflow_notify::NoopNotifier),
            false,
        );
        AppState {
            pool: pool.pool().clone(),
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(offline_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_task_with_bad_schedule_is_rejected_before_storage() {
        let app = create_router(offline_state());

        let body = serde_json::json!({
            "task_name": "bad-schedule",
            "schedule_type": "daily",
            "schedule_config": {"time": "25:99"},
            "action_type": "health_check",
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/scheduler/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        // rejected by boundary validation; the lazy pool proves no DB round
        // trip happened
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_action_kind_is_a_deserialization_error() {
        let app = create_router(offline_state());

        let body = serde_json::json!({
            "task_name": "bad-action",
            "schedule_type": "daily",
            "schedule_config": {"time": "02:00:00"},
            "action_type": "defragment",
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/scheduler/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
