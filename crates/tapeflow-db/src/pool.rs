//! Database connection pool management for TapeFlow
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.3.0
//!
//! This module provides database connection pool functionality for the
//! TapeFlow system. Pool sizing follows the `DB_POOL_SIZE`/`DB_MAX_OVERFLOW`
//! convention: the hard cap is base size plus overflow.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tapeflow_core::{DatabaseConfig, Result, TapeflowError};
use tracing::{debug, info, instrument};

/// Database connection pool with metrics
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Create a new database connection pool
    #[instrument(level = "debug")]
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        debug!("🔧 Creating database connection pool");
        let start = Instant::now();

        let statement_timeout = config.statement_timeout_secs;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.pool_size.min(2))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .after_connect(move |conn, _meta| {
                // ordinary queries run under the configured statement
                // timeout; the full sweep raises it per transaction
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = '{}s'", statement_timeout))
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
            .map_err(|e| TapeflowError::Database(e.to_string()))?;

        histogram!("db.pool.create.time", start.elapsed());
        info!(
            "✅ Created database connection pool with {} max connections",
            config.max_connections()
        );

        Ok(Self { pool })
    }

    /// Create a pool without connecting eagerly (used by tests and tooling)
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy(&config.url)
            .map_err(|e| TapeflowError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Get the inner SQLx pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the pool is connected
    #[instrument(level = "debug", skip(self))]
    pub async fn is_connected(&self) -> bool {
        check_pool_health(&self.pool).await.unwrap_or(false)
    }
}

/// Check if the database connection pool is healthy
#[instrument(level = "debug", skip(pool))]
pub async fn check_pool_health(pool: &PgPool) -> Result<bool> {
    debug!("🔧 Checking database connection pool health");

    let result = sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| TapeflowError::Database(e.to_string()))?;

    let is_healthy = result.rows_affected() == 1;
    counter!("db.pool.health_checks", 1);
    debug!("✅ Database connection pool health check: {}", is_healthy);

    Ok(is_healthy)
}

/// Get the number of active connections in the pool's database
#[instrument(level = "debug", skip(pool))]
pub async fn get_active_connections(pool: &PgPool) -> Result<u32> {
    let count = sqlx::query(
        "SELECT count(*) FROM pg_stat_activity WHERE datname = current_database()",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| TapeflowError::Database(e.to_string()))?
    .get::<i64, _>(0) as u32;

    Ok(count)
}
