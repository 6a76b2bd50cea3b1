//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in the `schema_version` table.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - Databases in the field have already applied them
//! 2. **Always add new migrations** - One function per schema change, bump `CURRENT_SCHEMA_VERSION`
//! 3. **Keep them idempotent** - A migration may be re-run after a crash mid-way

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Get current schema version from database
///
/// Returns 0 if no version has been recorded yet
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> = sqlx::query_scalar(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    Ok(())
}

/// Migration v1: enforce one row per natural key
///
/// The table is created without the UNIQUE index, so a database file may
/// already hold several rows for one natural key when this runs. Those are
/// collapsed to the row with the lowest surrogate id before the index is
/// created, otherwise `CREATE UNIQUE INDEX` would fail.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query(
        r#"
        DELETE FROM yield_records
        WHERE id NOT IN (
            SELECT MIN(id) FROM yield_records
            GROUP BY protocol_id, pool_name, chain
        )
        "#,
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if removed > 0 {
        warn!("Migration v1: removed {} duplicate yield records", removed);
    }

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_yield_records_natural_key
        ON yield_records(protocol_id, pool_name, chain)
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
