//! Thin action handlers
//!
//! Everything besides backup is a small probe or a pass-through: the heavy
//! machinery (recovery engine, tape retention sweeps) lives in its own
//! subsystem and is only pinged from here.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use tapeflow_core::Result;
use tapeflow_db::{backup_sets, pool::check_pool_health};
use tracing::{info, instrument};

use super::{ActionContext, ActionHandler};

/// Probes the database and the staging directory
pub struct HealthCheckHandler {
    pool: PgPool,
    compress_dir: PathBuf,
}

impl HealthCheckHandler {
    pub fn new(pool: PgPool, compress_dir: PathBuf) -> Self {
        Self { pool, compress_dir }
    }
}

#[async_trait]
impl ActionHandler for HealthCheckHandler {
    #[instrument(level = "debug", skip(self, _ctx))]
    async fn execute(&self, _ctx: ActionContext<'_>) -> Result<Value> {
        let database = check_pool_health(&self.pool).await.unwrap_or(false);
        let staging_dir = tokio::fs::metadata(&self.compress_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        let healthy = database && staging_dir;
        info!(
            "✅ Health check: database={}, staging_dir={}",
            database, staging_dir
        );

        Ok(json!({
            "status": if healthy { "success" } else { "degraded" },
            "database": database,
            "staging_dir": staging_dir,
        }))
    }
}

/// Counts backup sets whose retention window has lapsed; the actual
/// expiry/recycling runs in the tape subsystem
pub struct RetentionCheckHandler {
    pool: PgPool,
}

impl RetentionCheckHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionHandler for RetentionCheckHandler {
    #[instrument(level = "debug", skip(self, _ctx))]
    async fn execute(&self, _ctx: ActionContext<'_>) -> Result<Value> {
        let expired = backup_sets::count_expired_sets(&self.pool, Utc::now()).await?;
        info!("✅ Retention check: {} expired set(s)", expired);
        Ok(json!({
            "status": "success",
            "expired_sets": expired,
        }))
    }
}

/// Placeholder for staging-area cleanup; reports and returns
pub struct CleanupHandler {
    #[allow(dead_code)]
    pool: PgPool,
}

impl CleanupHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionHandler for CleanupHandler {
    #[instrument(level = "debug", skip(self, ctx))]
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value> {
        let retention_days = ctx
            .action_config
            .get("retention_days")
            .and_then(Value::as_i64);
        info!("✅ Cleanup pass requested (retention_days: {:?})", retention_days);
        Ok(json!({
            "status": "success",
            "message": "cleanup delegated to the tape subsystem",
        }))
    }
}

/// Recovery runs in the recovery engine; the scheduler only records the
/// request
pub struct RecoveryHandler;

#[async_trait]
impl ActionHandler for RecoveryHandler {
    #[instrument(level = "debug", skip(self, ctx))]
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value> {
        let set_id = ctx.action_config.get("backup_set_id").cloned();
        info!("✅ Recovery requested for set {:?}", set_id);
        Ok(json!({
            "status": "success",
            "message": "recovery delegated to the recovery engine",
            "backup_set_id": set_id,
        }))
    }
}

/// Custom actions are recorded, never executed in-process
pub struct CustomHandler;

#[async_trait]
impl ActionHandler for CustomHandler {
    #[instrument(level = "debug", skip(self, ctx))]
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value> {
        let command = ctx.action_config.get("command").cloned();
        info!("✅ Custom action recorded: {:?}", command);
        Ok(json!({
            "status": "success",
            "command": command,
        }))
    }
}
