//! Record store tests: natural-key upsert, filtering and re-sync lookups

use chrono::{Duration, Utc};
use defirates_common::db::{
    count_yield_records_for_protocol, distinct_assets, distinct_categories, distinct_chains,
    distinct_protocols, get_protocol_by_name, get_yield_record, get_yield_record_by_key,
    get_yield_records_by_ids, init_database, query_yield_records, upsert_protocol,
    upsert_yield_record, upsert_yield_records, Categories, FilterSpec, NewProtocol,
    NewYieldRecord, SortField, SortOrder,
};
use defirates_common::Error;
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn setup() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("test.db")).await.unwrap();
    (dir, pool)
}

async fn protocol_id(pool: &SqlitePool, name: &str) -> i64 {
    upsert_protocol(pool, &NewProtocol::new(name, format!("https://{}.example", name), ""))
        .await
        .unwrap()
        .id
}

fn record(protocol_id: i64, pool_name: &str, chain: &str, apy: f64, tvl: f64) -> NewYieldRecord {
    NewYieldRecord {
        protocol_id,
        pool_name: pool_name.to_string(),
        chain: chain.to_string(),
        asset: pool_name.to_string(),
        apy,
        tvl,
        maturity_date: None,
        categories: Categories::new(["PT"]),
        external_url: format!("https://example.com/{}", pool_name),
    }
}

#[tokio::test]
async fn test_protocol_upsert_keeps_identity() {
    let (_dir, pool) = setup().await;

    let first = upsert_protocol(&pool, &NewProtocol::new("Pendle", "https://old", "old"))
        .await
        .unwrap();
    let second = upsert_protocol(&pool, &NewProtocol::new("Pendle", "https://www.pendle.finance", "new"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);

    let stored = get_protocol_by_name(&pool, "Pendle").await.unwrap().unwrap();
    assert_eq!(stored.url, "https://www.pendle.finance");
    assert_eq!(stored.description, "new");
    assert!(get_protocol_by_name(&pool, "Unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_protocol_requires_name() {
    let (_dir, pool) = setup().await;
    let result = upsert_protocol(&pool, &NewProtocol::new("  ", "", "")).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let (_dir, pool) = setup().await;
    let pid = protocol_id(&pool, "Pendle").await;
    let rec = record(pid, "PoolX", "Ethereum", 10.0, 1000.0);

    let id1 = upsert_yield_record(&pool, &rec).await.unwrap();
    let before = get_yield_record(&pool, id1).await.unwrap().unwrap();
    let id2 = upsert_yield_record(&pool, &rec).await.unwrap();
    let after = get_yield_record(&pool, id2).await.unwrap().unwrap();

    assert_eq!(id1, id2);
    assert_eq!(count_yield_records_for_protocol(&pool, pid).await.unwrap(), 1);
    assert_eq!(before.created_at, after.created_at);
    assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
async fn test_upsert_preserves_identity_and_overwrites_fields() {
    let (_dir, pool) = setup().await;
    let pid = protocol_id(&pool, "Pendle").await;

    let mut rec = record(pid, "PoolX", "Ethereum", 5.0, 1000.0);
    let id1 = upsert_yield_record(&pool, &rec).await.unwrap();

    rec.apy = 9.0;
    rec.asset = "PoolX v2".to_string();
    rec.categories = Categories::new(["Liquidity"]);
    rec.maturity_date = Some(Utc::now() + Duration::days(30));
    let id2 = upsert_yield_record(&pool, &rec).await.unwrap();

    assert_eq!(id1, id2);
    let stored = get_yield_record_by_key(&pool, pid, "PoolX", "Ethereum")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, id1);
    assert_eq!(stored.apy, 9.0);
    assert_eq!(stored.asset, "PoolX v2");
    assert_eq!(stored.categories, "Liquidity");
    assert!(stored.maturity_date.is_some());
    assert_eq!(stored.protocol_name, "Pendle");
}

#[tokio::test]
async fn test_distinct_keys_get_distinct_ids() {
    let (_dir, pool) = setup().await;
    let pendle = protocol_id(&pool, "Pendle").await;
    let beefy = protocol_id(&pool, "Beefy").await;

    let records = vec![
        record(pendle, "PoolX", "Ethereum", 1.0, 1.0),
        record(pendle, "PoolX", "Arbitrum", 1.0, 1.0),
        record(pendle, "PoolY", "Ethereum", 1.0, 1.0),
        record(beefy, "PoolX", "Ethereum", 1.0, 1.0),
    ];

    let outcome = upsert_yield_records(&pool, &records).await;
    assert_eq!(outcome.failed, 0);

    let mut ids = outcome.stored.clone();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn test_batch_continues_after_failure() {
    let (_dir, pool) = setup().await;
    let pid = protocol_id(&pool, "Pendle").await;

    let records = vec![
        record(pid, "PoolA", "Ethereum", 1.0, 1.0),
        record(pid, "", "Ethereum", 1.0, 1.0),
        record(pid + 100, "Orphan", "Ethereum", 1.0, 1.0),
        record(pid, "PoolB", "Ethereum", 1.0, 1.0),
    ];

    let outcome = upsert_yield_records(&pool, &records).await;

    assert_eq!(outcome.stored.len(), 2);
    assert_eq!(outcome.failed, 2);
    assert_eq!(count_yield_records_for_protocol(&pool, pid).await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_upserts_of_same_key() {
    let (_dir, pool) = setup().await;
    let pid = protocol_id(&pool, "Pendle").await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            upsert_yield_record(&pool, &record(pid, "PoolX", "Ethereum", i as f64, 1.0)).await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(count_yield_records_for_protocol(&pool, pid).await.unwrap(), 1);
}

#[tokio::test]
async fn test_get_by_ids_omits_unknown() {
    let (_dir, pool) = setup().await;
    let pid = protocol_id(&pool, "Pendle").await;
    let id = upsert_yield_record(&pool, &record(pid, "PoolX", "Ethereum", 1.0, 1.0))
        .await
        .unwrap();
    assert_eq!(id, 1);

    let found = get_yield_records_by_ids(&pool, &[1, 999_999]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, 1);

    assert!(get_yield_records_by_ids(&pool, &[]).await.unwrap().is_empty());
    assert!(get_yield_records_by_ids(&pool, &[42, 43]).await.unwrap().is_empty());
}

async fn seed_for_filters(pool: &SqlitePool) {
    let pendle = protocol_id(pool, "Pendle").await;
    let beefy = protocol_id(pool, "Beefy").await;

    let mut eeth = record(pendle, "PT-eETH", "Ethereum", 12.45, 15_000_000.0);
    eeth.asset = "eETH".to_string();
    eeth.categories = Categories::new(["PT", "LRT", "Liquidity"]);

    let mut usde = record(pendle, "PT-sUSDe", "Arbitrum", 25.67, 5_000_000.0);
    usde.asset = "sUSDe".to_string();
    usde.categories = Categories::new(["PT", "Stablecoin"]);

    let mut lp = record(beefy, "curve-usdc", "Arbitrum", 4.2, 800_000.0);
    lp.asset = "USDC".to_string();
    lp.categories = Categories::new(["Beefy", "USDC"]);

    upsert_yield_records(pool, &[eeth, usde, lp]).await;
}

fn assets(records: &[defirates_common::db::YieldRecord]) -> Vec<&str> {
    records.iter().map(|r| r.asset.as_str()).collect()
}

#[tokio::test]
async fn test_default_sort_is_apy_desc() {
    let (_dir, pool) = setup().await;
    seed_for_filters(&pool).await;

    let all = query_yield_records(&pool, &FilterSpec::default()).await.unwrap();
    assert_eq!(assets(&all), vec!["sUSDe", "eETH", "USDC"]);
}

#[tokio::test]
async fn test_numeric_filters() {
    let (_dir, pool) = setup().await;
    seed_for_filters(&pool).await;

    let filter = FilterSpec {
        min_apy: Some(5.0),
        max_apy: Some(20.0),
        ..Default::default()
    };
    assert_eq!(assets(&query_yield_records(&pool, &filter).await.unwrap()), vec!["eETH"]);

    let filter = FilterSpec {
        min_tvl: Some(1_000_000.0),
        sort_by: SortField::Tvl,
        sort_order: SortOrder::Asc,
        ..Default::default()
    };
    assert_eq!(
        assets(&query_yield_records(&pool, &filter).await.unwrap()),
        vec!["sUSDe", "eETH"]
    );

    // Zero bounds are ignored
    let filter = FilterSpec {
        min_apy: Some(0.0),
        max_apy: Some(0.0),
        ..Default::default()
    };
    assert_eq!(query_yield_records(&pool, &filter).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_string_filters() {
    let (_dir, pool) = setup().await;
    seed_for_filters(&pool).await;

    let by_chain = FilterSpec {
        chain: Some("Arbitrum".to_string()),
        ..Default::default()
    };
    assert_eq!(
        assets(&query_yield_records(&pool, &by_chain).await.unwrap()),
        vec!["sUSDe", "USDC"]
    );

    let by_protocol = FilterSpec {
        protocol: Some("Beefy".to_string()),
        ..Default::default()
    };
    assert_eq!(assets(&query_yield_records(&pool, &by_protocol).await.unwrap()), vec!["USDC"]);

    let by_category = FilterSpec {
        category: Some("LRT".to_string()),
        ..Default::default()
    };
    assert_eq!(assets(&query_yield_records(&pool, &by_category).await.unwrap()), vec!["eETH"]);

    let blank_asset = FilterSpec {
        asset: Some("  ".to_string()),
        ..Default::default()
    };
    assert_eq!(query_yield_records(&pool, &blank_asset).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_distinct_values() {
    let (_dir, pool) = setup().await;
    seed_for_filters(&pool).await;

    assert_eq!(distinct_assets(&pool).await.unwrap(), vec!["USDC", "eETH", "sUSDe"]);
    assert_eq!(distinct_chains(&pool).await.unwrap(), vec!["Arbitrum", "Ethereum"]);
    assert_eq!(distinct_protocols(&pool).await.unwrap(), vec!["Beefy", "Pendle"]);
    assert_eq!(
        distinct_categories(&pool).await.unwrap(),
        vec!["Beefy", "LRT", "Liquidity", "PT", "Stablecoin", "USDC"]
    );
}
