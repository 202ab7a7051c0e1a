//! Tape cartridge registry
//!
//! The tape device itself belongs to the tape subsystem; this module only
//! keeps the cartridge bookkeeping the statistics and mover paths read.

use sqlx::postgres::PgPool;
use tapeflow_core::{Result, TapeStatus};
use tracing::{info, instrument};

use crate::models::TapeCartridge;

/// Get a cartridge by its external tape id
#[instrument(level = "debug", skip(pool))]
pub async fn get_tape(pool: &PgPool, tape_id: &str) -> Result<Option<TapeCartridge>> {
    sqlx::query("SELECT * FROM tape_cartridges WHERE tape_id = $1")
        .bind(tape_id)
        .fetch_optional(pool)
        .await?
        .map(|row| TapeCartridge::from_row(&row))
        .transpose()
}

/// List all cartridges, optionally restricted by status
#[instrument(level = "debug", skip(pool))]
pub async fn list_tapes(pool: &PgPool, status: Option<TapeStatus>) -> Result<Vec<TapeCartridge>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM tape_cartridges
        WHERE ($1::TEXT IS NULL OR status = $1)
        ORDER BY tape_id
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter().map(TapeCartridge::from_row).collect()
}

/// Register a cartridge or refresh its label/serial on re-discovery
#[instrument(level = "debug", skip(pool))]
pub async fn upsert_tape(
    pool: &PgPool,
    tape_id: &str,
    label: Option<&str>,
    serial_number: Option<&str>,
    capacity_bytes: i64,
) -> Result<TapeCartridge> {
    let row = sqlx::query(
        r#"
        INSERT INTO tape_cartridges (tape_id, label, serial_number, status, capacity_bytes)
        VALUES ($1, $2, $3, 'new', $4)
        ON CONFLICT (tape_id) DO UPDATE
        SET label = COALESCE(EXCLUDED.label, tape_cartridges.label),
            serial_number = COALESCE(EXCLUDED.serial_number, tape_cartridges.serial_number),
            capacity_bytes = EXCLUDED.capacity_bytes,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(tape_id)
    .bind(label)
    .bind(serial_number)
    .bind(capacity_bytes)
    .fetch_one(pool)
    .await?;

    let tape = TapeCartridge::from_row(&row)?;
    info!("✅ Registered tape cartridge {}", tape.tape_id);
    Ok(tape)
}

/// Set a cartridge's lifecycle status
#[instrument(level = "debug", skip(pool))]
pub async fn set_tape_status(pool: &PgPool, tape_id: &str, status: TapeStatus) -> Result<()> {
    sqlx::query(
        "UPDATE tape_cartridges SET status = $2, updated_at = NOW() WHERE tape_id = $1",
    )
    .bind(tape_id)
    .bind(status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}
