//! Protocol persistence
//!
//! Protocols are created or refreshed by name and never deleted during
//! normal operation.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::models::{NewProtocol, Protocol};
use crate::time::{from_db_timestamp, now, to_db_timestamp};
use crate::{Error, Result};

/// Create a protocol, or update its url/description when the name exists
///
/// Returns the stored row, so callers learn the protocol id either way.
pub async fn upsert_protocol(pool: &SqlitePool, protocol: &NewProtocol) -> Result<Protocol> {
    if protocol.name.trim().is_empty() {
        return Err(Error::InvalidInput("protocol name must not be empty".to_string()));
    }

    let row = sqlx::query(
        r#"
        INSERT INTO protocols (name, url, description, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            url = excluded.url,
            description = excluded.description
        RETURNING id, name, COALESCE(url, '') AS url,
                  COALESCE(description, '') AS description, created_at
        "#,
    )
    .bind(&protocol.name)
    .bind(&protocol.url)
    .bind(&protocol.description)
    .bind(to_db_timestamp(&now()))
    .fetch_one(pool)
    .await?;

    protocol_from_row(&row)
}

/// Look up a protocol by its unique name
pub async fn get_protocol_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Protocol>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, COALESCE(url, '') AS url,
               COALESCE(description, '') AS description, created_at
        FROM protocols
        WHERE name = ?
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(protocol_from_row).transpose()
}

fn protocol_from_row(row: &SqliteRow) -> Result<Protocol> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Protocol {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        description: row.try_get("description")?,
        created_at: from_db_timestamp(&created_at)?,
    })
}
