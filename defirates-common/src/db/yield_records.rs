//! Yield record persistence and the natural-key merge
//!
//! A yield record is identified across refresh cycles by its natural key
//! `(protocol_id, pool_name, chain)`. [`upsert_yield_record`] resolves that
//! key to a stable surrogate id in a single statement, relying on the
//! natural-key UNIQUE index, so concurrent upserts of the same key cannot
//! insert duplicates.

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use tracing::warn;

use crate::db::models::{FilterSpec, NewYieldRecord, YieldRecord};
use crate::time::{from_db_timestamp, now, to_db_timestamp};
use crate::{Error, Result};

/// Bound on ids per `IN (...)` clause
const ID_CHUNK_SIZE: usize = 500;

const SELECT_RECORDS: &str = r#"
    SELECT
        yr.id, yr.protocol_id, p.name AS protocol_name, yr.asset, yr.chain,
        yr.apy, yr.tvl, yr.maturity_date, yr.pool_name,
        COALESCE(yr.categories, '') AS categories,
        COALESCE(yr.external_url, '') AS external_url,
        yr.updated_at, yr.created_at
    FROM yield_records yr
    JOIN protocols p ON yr.protocol_id = p.id
"#;

/// Outcome of upserting a batch of records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Surrogate ids of stored records, in input order
    pub stored: Vec<i64>,
    /// Records that could not be stored
    pub failed: usize,
}

/// Insert a record, or update the existing row with the same natural key
///
/// On insert both `created_at` and `updated_at` are set to now. On update the
/// mutable fields (asset, APY, TVL, maturity, categories, external URL) are
/// overwritten and `updated_at` advances; the surrogate id, `created_at` and
/// the natural-key columns are never touched.
///
/// Returns the surrogate id either way.
pub async fn upsert_yield_record(pool: &SqlitePool, record: &NewYieldRecord) -> Result<i64> {
    if record.pool_name.trim().is_empty() || record.chain.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "natural key incomplete (protocol_id={}, pool_name='{}', chain='{}')",
            record.protocol_id, record.pool_name, record.chain
        )));
    }

    let timestamp = to_db_timestamp(&now());
    let maturity = record.maturity_date.as_ref().map(to_db_timestamp);

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO yield_records (
            protocol_id, pool_name, chain, asset, apy, tvl,
            maturity_date, categories, external_url, updated_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(protocol_id, pool_name, chain) DO UPDATE SET
            asset = excluded.asset,
            apy = excluded.apy,
            tvl = excluded.tvl,
            maturity_date = excluded.maturity_date,
            categories = excluded.categories,
            external_url = excluded.external_url,
            updated_at = MAX(yield_records.updated_at, excluded.updated_at)
        RETURNING id
        "#,
    )
    .bind(record.protocol_id)
    .bind(&record.pool_name)
    .bind(&record.chain)
    .bind(&record.asset)
    .bind(record.apy)
    .bind(record.tvl)
    .bind(maturity)
    .bind(record.categories.to_stored())
    .bind(&record.external_url)
    .bind(&timestamp)
    .bind(&timestamp)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Upsert records in order, continuing past individual failures
pub async fn upsert_yield_records(pool: &SqlitePool, records: &[NewYieldRecord]) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for record in records {
        match upsert_yield_record(pool, record).await {
            Ok(id) => outcome.stored.push(id),
            Err(e) => {
                warn!(
                    pool_name = %record.pool_name,
                    chain = %record.chain,
                    "Failed to store yield record: {}", e
                );
                outcome.failed += 1;
            }
        }
    }

    outcome
}

/// Query yield records with filtering and sorting
pub async fn query_yield_records(pool: &SqlitePool, filter: &FilterSpec) -> Result<Vec<YieldRecord>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_RECORDS);
    qb.push(" WHERE 1=1");

    if let Some(min_apy) = filter.min_apy.filter(|v| *v > 0.0) {
        qb.push(" AND yr.apy >= ").push_bind(min_apy);
    }
    if let Some(max_apy) = filter.max_apy.filter(|v| *v > 0.0) {
        qb.push(" AND yr.apy <= ").push_bind(max_apy);
    }
    if let Some(min_tvl) = filter.min_tvl.filter(|v| *v > 0.0) {
        qb.push(" AND yr.tvl >= ").push_bind(min_tvl);
    }
    if let Some(asset) = non_empty(&filter.asset) {
        qb.push(" AND yr.asset = ").push_bind(asset.to_string());
    }
    if let Some(chain) = non_empty(&filter.chain) {
        qb.push(" AND yr.chain = ").push_bind(chain.to_string());
    }
    if let Some(protocol) = non_empty(&filter.protocol) {
        qb.push(" AND p.name = ").push_bind(protocol.to_string());
    }
    if let Some(category) = non_empty(&filter.category) {
        qb.push(" AND yr.categories LIKE ")
            .push_bind(format!("%{}%", category));
    }

    // Column and direction come from closed enums, never from request text
    qb.push(format!(
        " ORDER BY {} {}, yr.id ASC",
        filter.sort_by.column(),
        filter.sort_order.sql()
    ));

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(record_from_row).collect()
}

/// Fetch the records with the given ids
///
/// Ids that no longer exist are silently omitted; an empty id list yields an
/// empty result.
pub async fn get_yield_records_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<YieldRecord>> {
    let mut records = Vec::new();

    for chunk in ids.chunks(ID_CHUNK_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_RECORDS);
        qb.push(" WHERE yr.id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY yr.id ASC");

        let rows = qb.build().fetch_all(pool).await?;
        for row in &rows {
            records.push(record_from_row(row)?);
        }
    }

    Ok(records)
}

/// Fetch a single record by surrogate id
pub async fn get_yield_record(pool: &SqlitePool, id: i64) -> Result<Option<YieldRecord>> {
    Ok(get_yield_records_by_ids(pool, &[id]).await?.into_iter().next())
}

/// Fetch a record by its natural key
pub async fn get_yield_record_by_key(
    pool: &SqlitePool,
    protocol_id: i64,
    pool_name: &str,
    chain: &str,
) -> Result<Option<YieldRecord>> {
    let sql = format!(
        "{} WHERE yr.protocol_id = ? AND yr.pool_name = ? AND yr.chain = ?",
        SELECT_RECORDS
    );

    let row = sqlx::query(&sql)
        .bind(protocol_id)
        .bind(pool_name)
        .bind(chain)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Number of stored records owned by a protocol
pub async fn count_yield_records_for_protocol(pool: &SqlitePool, protocol_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM yield_records WHERE protocol_id = ?")
        .bind(protocol_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// All distinct asset labels, sorted
pub async fn distinct_assets(pool: &SqlitePool) -> Result<Vec<String>> {
    let assets = sqlx::query_scalar("SELECT DISTINCT asset FROM yield_records ORDER BY asset")
        .fetch_all(pool)
        .await?;
    Ok(assets)
}

/// All distinct chain names, sorted
pub async fn distinct_chains(pool: &SqlitePool) -> Result<Vec<String>> {
    let chains = sqlx::query_scalar("SELECT DISTINCT chain FROM yield_records ORDER BY chain")
        .fetch_all(pool)
        .await?;
    Ok(chains)
}

/// Names of protocols that own at least one record, sorted
pub async fn distinct_protocols(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar(
        r#"
        SELECT DISTINCT p.name
        FROM protocols p
        JOIN yield_records yr ON yr.protocol_id = p.id
        ORDER BY p.name
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// All distinct category tags, split out of the stored comma-joined strings
pub async fn distinct_categories(pool: &SqlitePool) -> Result<Vec<String>> {
    let stored: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT categories FROM yield_records WHERE categories IS NOT NULL AND categories != ''",
    )
    .fetch_all(pool)
    .await?;

    let tags: BTreeSet<String> = stored
        .iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    Ok(tags.into_iter().collect())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn record_from_row(row: &SqliteRow) -> Result<YieldRecord> {
    let maturity: Option<String> = row.try_get("maturity_date")?;
    let updated_at: String = row.try_get("updated_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(YieldRecord {
        id: row.try_get("id")?,
        protocol_id: row.try_get("protocol_id")?,
        protocol_name: row.try_get("protocol_name")?,
        asset: row.try_get("asset")?,
        chain: row.try_get("chain")?,
        apy: row.try_get("apy")?,
        tvl: row.try_get("tvl")?,
        maturity_date: maturity.as_deref().map(from_db_timestamp).transpose()?,
        pool_name: row.try_get("pool_name")?,
        categories: row.try_get("categories")?,
        external_url: row.try_get("external_url")?,
        updated_at: from_db_timestamp(&updated_at)?,
        created_at: from_db_timestamp(&created_at)?,
    })
}
