//! Webhook notification channel
//!
//! Posts markdown-style messages to an operations chat webhook. The payload
//! shape (`{"msgtype": "markdown", "markdown": {"title", "text"}}`) matches
//! what the ops channel bots accept.

use async_trait::async_trait;
use serde_json::{json, Value};
use tapeflow_core::{Result, TapeflowError};
use tracing::{debug, instrument, warn};

use crate::Notifier;

/// Notifier posting to a chat webhook URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    #[instrument(level = "debug", skip(self, text))]
    async fn post_markdown(&self, title: &str, text: &str) -> Result<()> {
        let payload = json!({
            "msgtype": "markdown",
            "markdown": {
                "title": title,
                "text": text,
            }
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TapeflowError::Internal(format!("webhook send failed: {}", e)))?;

        if !response.status().is_success() {
            warn!("⚠️ Webhook returned status {}", response.status());
            return Err(TapeflowError::Internal(format!(
                "webhook returned status {}",
                response.status()
            )));
        }

        debug!("✅ Notification delivered: {}", title);
        Ok(())
    }
}

/// Render the task-failure message body
pub fn task_failure_text(
    task_name: &str,
    task_id: i64,
    execution_id: &str,
    error: &str,
    duration_ms: i64,
) -> String {
    format!(
        "## Scheduled task failed\n\n\
         **Task**: {}\n\
         **Task ID**: {}\n\
         **Execution ID**: {}\n\
         **Duration**: {:.2}s\n\
         **Error**: {}\n\n\
         Check the task configuration and the run log.",
        task_name,
        task_id,
        execution_id,
        duration_ms as f64 / 1000.0,
        error
    )
}

/// Render the backup outcome message body
pub fn backup_text(backup_name: &str, status: &str, details: &Value) -> String {
    let mut text = format!(
        "## Backup {}\n\n**Task**: {}\n**Status**: {}\n",
        status, backup_name, status
    );
    if let Some(map) = details.as_object() {
        for (key, value) in map {
            text.push_str(&format!("**{}**: {}\n", key, value));
        }
    }
    text
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_task_failure(
        &self,
        task_name: &str,
        task_id: i64,
        execution_id: &str,
        error: &str,
        duration_ms: i64,
    ) -> Result<()> {
        let text = task_failure_text(task_name, task_id, execution_id, error, duration_ms);
        self.post_markdown("❌ Scheduled task failed", &text).await
    }

    async fn notify_backup(&self, backup_name: &str, status: &str, details: &Value) -> Result<()> {
        let title = if status == "completed" {
            "✅ Backup completed"
        } else {
            "❌ Backup failed"
        };
        let text = backup_text(backup_name, status, details);
        self.post_markdown(title, &text).await
    }

    async fn notify_system(&self, title: &str, content: &str) -> Result<()> {
        self.post_markdown(title, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_failure_text_mentions_everything() {
        let text = task_failure_text("nightly-backup", 7, "abc-123", "tape offline", 2500);
        assert!(text.contains("nightly-backup"));
        assert!(text.contains("**Task ID**: 7"));
        assert!(text.contains("abc-123"));
        assert!(text.contains("tape offline"));
        assert!(text.contains("2.50s"));
    }

    #[test]
    fn test_backup_text_includes_details() {
        let details = json!({"backup_set_id": "bs-9", "total_files": 120});
        let text = backup_text("monthly-full", "completed", &details);
        assert!(text.contains("monthly-full"));
        assert!(text.contains("**backup_set_id**: \"bs-9\""));
        assert!(text.contains("**total_files**: 120"));
    }

    #[test]
    fn test_backup_text_without_details() {
        let text = backup_text("adhoc", "failed", &Value::Null);
        assert!(text.contains("**Status**: failed"));
    }
}
