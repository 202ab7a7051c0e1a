//! TapeFlow - tape backup orchestrator
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.3.0
//!
//! Binary entry point: loads configuration, runs migrations and crash
//! recovery, wires the scheduler engine, the backup pipeline and the tape
//! mover together, then serves the management API until shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

use tapeflow_api::AppState;
use tapeflow_backup::{spawn_mover, BackupEngine};
use tapeflow_core::{ActionKind, ScheduleType, TapeflowConfig};
use tapeflow_db::models::NewScheduledTask;
use tapeflow_db::{migrations, DatabasePool};
use tapeflow_notify::{NoopNotifier, Notifier, WebhookNotifier};
use tapeflow_scheduler::{ActionRegistry, SchedulerEngine};
use tapeflow_tape::{LtfsVolumeMover, TapeFileMover};

/// TapeFlow tape backup orchestrator
#[derive(Debug, Parser)]
#[command(name = "tapeflow", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TAPEFLOW_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config =
        TapeflowConfig::load(cli.config.as_deref()).context("loading configuration")?;
    info!("🚀 TapeFlow {} starting", env!("CARGO_PKG_VERSION"));

    migrations::create_database(&config.database.url)
        .await
        .context("creating database")?;
    let db = DatabasePool::new(&config.database)
        .await
        .context("connecting to database")?;
    migrations::run_migrations(db.pool())
        .await
        .context("running migrations")?;

    // crash recovery: a previous process may have died holding locks
    let (locks_released, tasks_reset) =
        tapeflow_scheduler::unlocker::unlock_all(db.pool()).await?;
    if locks_released > 0 || tasks_reset > 0 {
        warn!(
            "⚠️ Startup recovery released {} lock(s) and reset {} task(s)",
            locks_released, tasks_reset
        );
    }

    tokio::fs::create_dir_all(config.pipeline.compress_dir.join("work")).await?;
    tokio::fs::create_dir_all(config.pipeline.final_root()).await?;
    tokio::fs::create_dir_all(&config.tape.recovery_temp_dir).await?;

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    };

    let backup_engine = Arc::new(BackupEngine::new(
        db.pool().clone(),
        config.pipeline.clone(),
        config.database.sweep_timeout_secs,
    ));

    let registry = ActionRegistry::standard(
        db.pool().clone(),
        backup_engine.clone(),
        config.pipeline.compress_dir.clone(),
    );

    let scheduler = SchedulerEngine::new(
        db.pool().clone(),
        Duration::from_secs(config.scheduler.tick_secs),
        registry,
        notifier,
        config.notify.notify_on_success,
    );

    if config.scheduler.enabled {
        seed_default_tasks(&scheduler, &config).await;
        scheduler.initialize().await?;
        scheduler.start().await;
    } else {
        info!("🔕 Scheduler disabled by configuration");
    }

    // the tape mover scans final/ independently of any execution
    let mover_cancel = CancellationToken::new();
    let tape_mover: Arc<dyn TapeFileMover> =
        Arc::new(LtfsVolumeMover::for_drive_letter(&config.tape.drive_letter));
    let mover_handle = spawn_mover(
        backup_engine.store(),
        tape_mover,
        config.pipeline.final_root(),
        Duration::from_secs(config.pipeline.mover_scan_secs),
        mover_cancel.clone(),
    );

    let state = AppState {
        pool: db.pool().clone(),
        scheduler: scheduler.clone(),
    };
    let router = tapeflow_api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("✅ Management API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving API")?;

    info!("🛑 Shutting down");
    scheduler.shutdown().await;
    mover_cancel.cancel();
    if let Err(e) = mover_handle.await {
        warn!("⚠️ Tape mover join failed: {}", e);
    }

    info!("✅ TapeFlow stopped cleanly");
    Ok(())
}

/// Seed the built-in maintenance tasks; existing rows keep their settings
async fn seed_default_tasks(scheduler: &SchedulerEngine, config: &TapeflowConfig) {
    let defaults = [
        NewScheduledTask {
            task_name: "health_check".to_string(),
            description: Some("periodic system health probe".to_string()),
            schedule_type: ScheduleType::Cron,
            schedule_config: json!({"cron": "0 0 */6 * * *"}),
            action_type: ActionKind::HealthCheck,
            action_config: json!({}),
            enabled: true,
            task_metadata: json!({}),
            tags: json!(["builtin"]),
            backup_task_id: None,
        },
        NewScheduledTask {
            task_name: "retention_check".to_string(),
            description: Some("tape retention window check".to_string()),
            schedule_type: ScheduleType::Cron,
            schedule_config: json!({"cron": config.scheduler.retention_check_cron}),
            action_type: ActionKind::RetentionCheck,
            action_config: json!({}),
            enabled: true,
            task_metadata: json!({}),
            tags: json!(["builtin"]),
            backup_task_id: None,
        },
    ];

    for task in defaults {
        let name = task.task_name.clone();
        match scheduler.add_task(task).await {
            Ok(_) => info!("✅ Seeded builtin task {}", name),
            Err(tapeflow_core::TapeflowError::Conflict(_)) => {
                // already present from a previous start
            }
            Err(e) => warn!("⚠️ Could not seed builtin task {}: {}", name, e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ Could not listen for shutdown signal: {}", e);
    }
    info!("🛑 Shutdown signal received");
}
