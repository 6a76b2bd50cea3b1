//! Pendle markets source
//!
//! Active markets are listed per chain at `{base}/v1/{chain_id}/markets/active`.
//! A chain that fails is skipped; the fetch only fails when every chain does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use defirates_common::db::{Categories, NewProtocol, NewYieldRecord};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{ResilientHttpClient, SourceError, YieldSource};

pub const SOURCE_NAME: &str = "pendle";
pub const PENDLE_BASE_URL: &str = "https://api-v2.pendle.finance/api/core";
const PENDLE_SITE: &str = "https://app.pendle.finance";

/// Chains queried for active markets
pub const PENDLE_CHAIN_IDS: &[u64] = &[1, 10, 56, 146, 999, 5000, 8453, 9745, 42161, 80094];

#[derive(Debug, Default, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    markets: Vec<PendleMarket>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendleMarket {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub expiry: String,
    #[serde(default)]
    pub details: MarketDetails,
    #[serde(default)]
    pub category_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDetails {
    pub liquidity: Option<f64>,
    /// Decimal fraction, 0.05 = 5%
    pub implied_apy: Option<f64>,
}

pub fn chain_name(chain_id: u64) -> String {
    let name = match chain_id {
        1 => "Ethereum",
        10 => "Optimism",
        56 => "BSC",
        146 => "Sonic",
        999 => "Zora",
        5000 => "Mantle",
        8453 => "Base",
        9745 => "Taiko",
        42161 => "Arbitrum",
        80094 => "Berachain",
        other => return format!("Chain-{}", other),
    };
    name.to_string()
}

/// Parse a market expiry such as `2025-12-26T00:00:00.000Z`
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Map one market to a record for `protocol_id`
pub fn to_yield_record(market: &PendleMarket, chain_id: u64, protocol_id: i64) -> NewYieldRecord {
    NewYieldRecord {
        protocol_id,
        pool_name: format!("{}-{}", market.name, chain_id),
        chain: chain_name(chain_id),
        asset: market.name.clone(),
        apy: market.details.implied_apy.unwrap_or(0.0) * 100.0,
        tvl: market.details.liquidity.unwrap_or(0.0),
        maturity_date: parse_expiry(&market.expiry),
        categories: Categories::new(&market.category_ids),
        external_url: format!("https://app.pendle.finance/trade/pools/{}/", market.address),
    }
}

pub struct PendleSource {
    client: ResilientHttpClient,
    base_url: String,
    chain_ids: Vec<u64>,
}

impl PendleSource {
    pub fn new(client: ResilientHttpClient) -> Self {
        Self::with_base_url(client, PENDLE_BASE_URL)
    }

    pub fn with_base_url(client: ResilientHttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chain_ids: PENDLE_CHAIN_IDS.to_vec(),
        }
    }

    pub fn with_chain_ids(mut self, chain_ids: Vec<u64>) -> Self {
        self.chain_ids = chain_ids;
        self
    }

    async fn markets_for_chain(&self, chain_id: u64) -> Result<Vec<PendleMarket>, SourceError> {
        let url = format!("{}/v1/{}/markets/active", self.base_url, chain_id);
        let response: MarketsResponse = self.client.get_json(&url, PENDLE_SITE).await?;
        Ok(response.markets)
    }
}

#[async_trait]
impl YieldSource for PendleSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn protocol(&self) -> NewProtocol {
        NewProtocol::new(
            "Pendle",
            "https://www.pendle.finance",
            "Pendle is a protocol that enables the tokenization and trading of future yield",
        )
    }

    async fn fetch(&self, protocol_id: i64) -> Result<Vec<NewYieldRecord>, SourceError> {
        let now = Utc::now();
        let mut records = Vec::new();
        let mut failed_chains = 0;
        let mut expired = 0;
        let mut unparseable = 0;

        for &chain_id in &self.chain_ids {
            let markets = match self.markets_for_chain(chain_id).await {
                Ok(markets) => markets,
                Err(e) => {
                    warn!(chain_id, "Failed to fetch Pendle markets: {}", e);
                    failed_chains += 1;
                    continue;
                }
            };
            debug!(chain_id, markets = markets.len(), "Fetched Pendle markets");

            for market in &markets {
                match parse_expiry(&market.expiry) {
                    Some(expiry) if expiry > now => {
                        records.push(to_yield_record(market, chain_id, protocol_id));
                    }
                    Some(_) => expired += 1,
                    None => unparseable += 1,
                }
            }
        }

        if !self.chain_ids.is_empty() && failed_chains == self.chain_ids.len() {
            return Err(SourceError::Unavailable(format!(
                "Pendle markets unavailable on all {} chains",
                failed_chains
            )));
        }

        info!(
            active = records.len(),
            expired,
            unparseable,
            failed_chains,
            "Pendle markets fetched"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> PendleMarket {
        serde_json::from_value(serde_json::json!({
            "name": "PT-eETH",
            "address": "0xf32e58f2f85714a65d2dcbb753e00ce58434f000",
            "expiry": "2099-12-26T00:00:00.000Z",
            "details": { "liquidity": 15234567.89, "impliedApy": 0.1245, "pendleApy": 0.02 },
            "categoryIds": ["PT", "LRT", "PT"]
        }))
        .unwrap()
    }

    #[test]
    fn test_chain_names() {
        assert_eq!(chain_name(1), "Ethereum");
        assert_eq!(chain_name(42161), "Arbitrum");
        assert_eq!(chain_name(80094), "Berachain");
        assert_eq!(chain_name(7777), "Chain-7777");
    }

    #[test]
    fn test_parse_expiry_formats() {
        assert!(parse_expiry("2025-12-26T00:00:00.000Z").is_some());
        assert!(parse_expiry("2025-12-26T00:00:00Z").is_some());
        assert!(parse_expiry("2025-12-26").is_none());
        assert!(parse_expiry("").is_none());
    }

    #[test]
    fn test_adapter_populates_natural_key() {
        let record = to_yield_record(&market(), 42161, 3);

        assert_eq!(record.protocol_id, 3);
        assert_eq!(record.pool_name, "PT-eETH-42161");
        assert_eq!(record.chain, "Arbitrum");
        assert_eq!(record.asset, "PT-eETH");
        assert!((record.apy - 12.45).abs() < 1e-9);
        assert_eq!(record.tvl, 15234567.89);
        assert_eq!(record.categories.to_stored(), "PT, LRT");
        assert_eq!(
            record.external_url,
            "https://app.pendle.finance/trade/pools/0xf32e58f2f85714a65d2dcbb753e00ce58434f000/"
        );
        assert!(record.maturity_date.is_some());
    }

    #[test]
    fn test_missing_details_default_to_zero() {
        let market: PendleMarket = serde_json::from_value(serde_json::json!({
            "name": "PT-x",
            "address": "0x1",
            "expiry": "2099-01-01T00:00:00Z",
            "details": { "liquidity": null }
        }))
        .unwrap();

        let record = to_yield_record(&market, 1, 1);
        assert_eq!(record.apy, 0.0);
        assert_eq!(record.tvl, 0.0);
        assert!(record.categories.is_empty());
    }
}
