//! TapeFlow Management API
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.3.0
//!
//! Axum HTTP surface for operating the scheduler and the backup catalog.
//! Configuration payloads are validated at this boundary; malformed
//! schedule or action configs never reach storage.

#![forbid(unsafe_code)]

pub mod error;
pub mod handlers;
pub mod routes;

use sqlx::postgres::PgPool;
use tapeflow_scheduler::SchedulerEngine;

pub use routes::create_router;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub scheduler: SchedulerEngine,
}
