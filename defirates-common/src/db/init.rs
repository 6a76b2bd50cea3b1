//! Database initialization
//!
//! Opens (or creates) the SQLite store, applies connection pragmas, creates
//! tables idempotently and runs pending migrations.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        // WAL lets the live-view re-sync queries read while a refresh cycle writes
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema_version_table(&pool).await?;
    create_protocols_table(&pool).await?;
    create_yield_records_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the protocols table
///
/// Identity is the unique `name`.
pub async fn create_protocols_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS protocols (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            url TEXT,
            description TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the yield_records table and its lookup indexes
///
/// The natural-key UNIQUE index is created by migration v1, which first
/// collapses any rows that already share a key.
pub async fn create_yield_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS yield_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            protocol_id INTEGER NOT NULL,
            asset TEXT NOT NULL,
            chain TEXT NOT NULL,
            apy REAL NOT NULL,
            tvl REAL NOT NULL,
            maturity_date TEXT,
            pool_name TEXT NOT NULL,
            categories TEXT,
            external_url TEXT,
            updated_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (protocol_id) REFERENCES protocols(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_yield_records_protocol ON yield_records(protocol_id)",
        "CREATE INDEX IF NOT EXISTS idx_yield_records_apy ON yield_records(apy)",
        "CREATE INDEX IF NOT EXISTS idx_yield_records_asset ON yield_records(asset)",
        "CREATE INDEX IF NOT EXISTS idx_yield_records_chain ON yield_records(chain)",
        "CREATE INDEX IF NOT EXISTS idx_yield_records_categories ON yield_records(categories)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
