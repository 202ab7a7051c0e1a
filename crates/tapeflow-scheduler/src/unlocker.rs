//! Operator unlock routines
//!
//! After a crash, `task_locks` rows can stay active and tasks can stay
//! `running` with no execution behind them. These routines reconcile both:
//! used by the startup recovery path and the unlock endpoints.

use sqlx::postgres::PgPool;
use tapeflow_core::Result;
use tapeflow_db::{locks, scheduled_tasks};
use tracing::{info, instrument};

/// Force-release a task's lock and reset its status if stuck in `running`.
/// Returns whether anything changed.
#[instrument(level = "debug", skip(pool))]
pub async fn unlock_task(pool: &PgPool, task_id: i64) -> Result<bool> {
    let released = locks::release_locks_by_task(pool, task_id).await?;
    let reset = scheduled_tasks::reset_running_task(pool, task_id).await?;

    info!(
        "✅ Unlocked task {}: {} lock(s) released, status reset: {}",
        task_id, released, reset
    );
    Ok(released > 0 || reset)
}

/// Release every active lock and reset every `running` task. Returns
/// `(locks_released, tasks_reset)`.
#[instrument(level = "debug", skip(pool))]
pub async fn unlock_all(pool: &PgPool) -> Result<(u64, u64)> {
    let released = locks::release_all_locks(pool).await?;
    let reset = scheduled_tasks::reset_running_tasks(pool).await?;

    info!(
        "✅ Unlocked all tasks: {} lock(s) released, {} task(s) reset",
        released, reset
    );
    Ok((released, reset))
}
