//! TapeFlow Notification Dispatch
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.3.0
//!
//! Operational notifications for task and backup outcomes. The scheduler and
//! the backup pipeline talk to the `Notifier` trait; deployments wire either
//! the webhook implementation or the no-op one. Notification failures are
//! never allowed to fail the operation that triggered them.

#![forbid(unsafe_code)]

pub mod webhook;

use async_trait::async_trait;
use serde_json::Value;
use tapeflow_core::Result;
use tracing::debug;

pub use webhook::WebhookNotifier;

/// Outcome notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A scheduled task execution failed
    async fn notify_task_failure(
        &self,
        task_name: &str,
        task_id: i64,
        execution_id: &str,
        error: &str,
        duration_ms: i64,
    ) -> Result<()>;

    /// A backup execution finished (success or failure)
    async fn notify_backup(&self, backup_name: &str, status: &str, details: &Value) -> Result<()>;

    /// Free-form system notification
    async fn notify_system(&self, title: &str, content: &str) -> Result<()>;
}

/// Notifier that drops everything (webhook not configured)
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_task_failure(
        &self,
        task_name: &str,
        _task_id: i64,
        _execution_id: &str,
        _error: &str,
        _duration_ms: i64,
    ) -> Result<()> {
        debug!("🔕 Notification suppressed (no webhook): task failure {}", task_name);
        Ok(())
    }

    async fn notify_backup(&self, backup_name: &str, _status: &str, _details: &Value) -> Result<()> {
        debug!("🔕 Notification suppressed (no webhook): backup {}", backup_name);
        Ok(())
    }

    async fn notify_system(&self, title: &str, _content: &str) -> Result<()> {
        debug!("🔕 Notification suppressed (no webhook): {}", title);
        Ok(())
    }
}
