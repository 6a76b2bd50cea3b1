//! Demonstration data
//!
//! Seeds a fixed set of Pendle and Beefy listings through the normal upsert
//! path, so the page has content before the first live fetch completes.

use chrono::{DateTime, TimeZone, Utc};
use defirates_common::db::{upsert_protocol, upsert_yield_records, Categories, NewProtocol, NewYieldRecord};
use defirates_common::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

struct SampleRow {
    asset: &'static str,
    chain: &'static str,
    apy: f64,
    tvl: f64,
    /// `(year, month, day)`
    maturity: Option<(i32, u32, u32)>,
    pool_name: &'static str,
    categories: &'static str,
    url: &'static str,
}

const PENDLE_ROWS: &[SampleRow] = &[
    SampleRow { asset: "eETH", chain: "Ethereum", apy: 12.45, tvl: 15_234_567.89, maturity: Some((2025, 12, 26)), pool_name: "PT-eETH-26DEC2025", categories: "PT, LRT, Liquidity", url: "https://app.pendle.finance/trade/pools/0xf32e58f2f85714a65d2dcbb753e00ce58434f000/" },
    SampleRow { asset: "ezETH", chain: "Ethereum", apy: 15.23, tvl: 8_945_123.45, maturity: Some((2025, 12, 26)), pool_name: "PT-ezETH-26DEC2025", categories: "PT, LRT", url: "https://app.pendle.finance/trade/pools/0xd1d7d99764f8a52aff007b7831cc02748b2013b5/" },
    SampleRow { asset: "rsETH", chain: "Ethereum", apy: 13.87, tvl: 12_678_901.23, maturity: Some((2025, 12, 26)), pool_name: "PT-rsETH-26DEC2025", categories: "PT, LRT, Liquidity", url: "https://app.pendle.finance/trade/pools/0x4f43c77872db6ba177c270986cd30c3381af37ee/" },
    SampleRow { asset: "sUSDe", chain: "Ethereum", apy: 25.67, tvl: 45_123_456.78, maturity: Some((2026, 1, 29)), pool_name: "PT-sUSDe-29JAN2026", categories: "PT, Stablecoin", url: "https://app.pendle.finance/trade/pools/0x4a8e8befd2cf1480032a6f8a5c45d8c3ae1e8829/" },
    SampleRow { asset: "LBTC", chain: "Ethereum", apy: 8.92, tvl: 23_456_789.01, maturity: Some((2025, 12, 26)), pool_name: "PT-LBTC-26DEC2025", categories: "PT, BTC", url: "https://app.pendle.finance/trade/pools/0x8a47b431a7d947c6a3ed6e42d501803615a97eaa/" },
    SampleRow { asset: "USDe", chain: "Arbitrum", apy: 18.23, tvl: 34_567_890.12, maturity: Some((2026, 1, 29)), pool_name: "PT-USDe-29JAN2026", categories: "PT, Stablecoin, Liquidity", url: "https://app.pendle.finance/trade/pools/0xbfef9183b47b3dd89a025f7dbfb44c58f4e0b68f/" },
    SampleRow { asset: "wstETH", chain: "Optimism", apy: 11.78, tvl: 9_876_543.21, maturity: Some((2025, 12, 26)), pool_name: "PT-wstETH-26DEC2025", categories: "PT, LST, Liquidity", url: "https://app.pendle.finance/trade/pools/0x1c27ad8a19ba026adabd615f6bc77158130cfbe4/" },
    SampleRow { asset: "cbBTC", chain: "Base", apy: 9.87, tvl: 18_234_567.89, maturity: Some((2025, 12, 26)), pool_name: "PT-cbBTC-26DEC2025", categories: "PT, BTC, Liquidity", url: "https://app.pendle.finance/trade/pools/0x94caeb3b9a1b7c61ef364f6c52260cf89b3bc667/" },
];

const BEEFY_ROWS: &[SampleRow] = &[
    SampleRow { asset: "WETH-USDC LP", chain: "Ethereum", apy: 8.45, tvl: 12_345_678.90, maturity: None, pool_name: "uniswap-v3-eth-usdc", categories: "Beefy, WETH, USDC", url: "https://app.beefy.finance/vault/uniswap-v3-eth-usdc" },
    SampleRow { asset: "wstETH", chain: "Ethereum", apy: 4.23, tvl: 45_678_901.23, maturity: None, pool_name: "lido-wsteth", categories: "Beefy, wstETH", url: "https://app.beefy.finance/vault/lido-wsteth" },
    SampleRow { asset: "USDC-USDT LP", chain: "Arbitrum", apy: 6.78, tvl: 23_456_789.01, maturity: None, pool_name: "curve-arb-2pool", categories: "Beefy, USDC, USDT", url: "https://app.beefy.finance/vault/curve-arb-2pool" },
    SampleRow { asset: "CAKE", chain: "BSC", apy: 22.45, tvl: 9_876_543.21, maturity: None, pool_name: "pancake-cake", categories: "Beefy, CAKE", url: "https://app.beefy.finance/vault/pancake-cake" },
    SampleRow { asset: "AVAX-USDC LP", chain: "Avalanche", apy: 11.23, tvl: 21_234_567.89, maturity: None, pool_name: "trader-joe-avax-usdc", categories: "Beefy, AVAX, USDC", url: "https://app.beefy.finance/vault/trader-joe-avax-usdc" },
    SampleRow { asset: "ETH-USDC LP", chain: "Base", apy: 13.89, tvl: 17_890_123.45, maturity: None, pool_name: "aerodrome-base-eth-usdc", categories: "Beefy, ETH, USDC", url: "https://app.beefy.finance/vault/aerodrome-base-eth-usdc" },
];

fn maturity(date: Option<(i32, u32, u32)>) -> Option<DateTime<Utc>> {
    date.and_then(|(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single())
}

fn to_records(rows: &[SampleRow], protocol_id: i64) -> Vec<NewYieldRecord> {
    rows.iter()
        .map(|row| NewYieldRecord {
            protocol_id,
            pool_name: row.pool_name.to_string(),
            chain: row.chain.to_string(),
            asset: row.asset.to_string(),
            apy: row.apy,
            tvl: row.tvl,
            maturity_date: maturity(row.maturity),
            categories: Categories::parse(row.categories),
            external_url: row.url.to_string(),
        })
        .collect()
}

/// Seed the sample listings, returning how many records were stored
pub async fn load_sample_data(pool: &SqlitePool) -> Result<usize> {
    info!("Loading sample data");

    let pendle = upsert_protocol(
        pool,
        &NewProtocol::new(
            "Pendle",
            "https://www.pendle.finance",
            "Pendle is a protocol that enables the tokenization and trading of future yield",
        ),
    )
    .await?;
    let beefy = upsert_protocol(
        pool,
        &NewProtocol::new(
            "Beefy",
            "https://beefy.finance",
            "Beefy is a Decentralized, Multichain Yield Optimizer",
        ),
    )
    .await?;

    let mut stored = 0;
    for (name, records) in [
        ("Pendle", to_records(PENDLE_ROWS, pendle.id)),
        ("Beefy", to_records(BEEFY_ROWS, beefy.id)),
    ] {
        let outcome = upsert_yield_records(pool, &records).await;
        if outcome.failed > 0 {
            warn!("{} of {} {} sample records failed", outcome.failed, records.len(), name);
        }
        stored += outcome.stored.len();
    }

    info!("Loaded {} sample records", stored);
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use defirates_common::db::{init_database, query_yield_records, FilterSpec};

    #[tokio::test]
    async fn test_sample_load_is_repeatable() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("sample.db")).await.unwrap();

        let first = load_sample_data(&pool).await.unwrap();
        let second = load_sample_data(&pool).await.unwrap();
        let total = PENDLE_ROWS.len() + BEEFY_ROWS.len();

        assert_eq!(first, total);
        assert_eq!(second, total);
        let stored = query_yield_records(&pool, &FilterSpec::default()).await.unwrap();
        assert_eq!(stored.len(), total);
        assert_eq!(stored[0].asset, "sUSDe");
    }
}
