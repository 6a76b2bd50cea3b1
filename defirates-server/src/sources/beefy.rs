//! Beefy vaults source
//!
//! Vault lists come per chain from `{base}/vaults/{chain}`; APY and TVL come
//! from the global `{base}/apy/breakdown` and `{base}/tvl` maps. A failed APY
//! or TVL lookup degrades to zeros rather than dropping the vaults.

use async_trait::async_trait;
use defirates_common::db::{Categories, NewProtocol, NewYieldRecord};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{ResilientHttpClient, SourceError, YieldSource};

pub const SOURCE_NAME: &str = "beefy";
pub const BEEFY_BASE_URL: &str = "https://api.beefy.finance";
const BEEFY_SITE: &str = "https://app.beefy.finance";

pub const BEEFY_CHAINS: &[&str] = &[
    "arbitrum", "aurora", "avax", "base", "bsc", "canto", "celo", "cronos", "emerald", "ethereum",
    "fantom", "fuse", "harmony", "heco", "kava", "metis", "moonbeam", "moonriver", "optimism",
    "polygon", "zkevm", "zksync",
];

/// Asset tags carried into categories, after the `Beefy` tag
const MAX_ASSET_TAGS: usize = 3;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeefyVault {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub platform_id: String,
    #[serde(default)]
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApyBreakdown {
    /// Decimal fraction, 0.05 = 5%
    pub total_apy: Option<f64>,
}

/// `/tvl` value: either a vault's TVL or a per-chain map of them
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TvlEntry {
    Flat(f64),
    Nested(HashMap<String, f64>),
}

/// Flatten a `/tvl` response into vault id → TVL
fn flatten_tvl(raw: HashMap<String, TvlEntry>) -> HashMap<String, f64> {
    let mut tvl = HashMap::new();
    for (key, entry) in raw {
        match entry {
            TvlEntry::Flat(value) => {
                tvl.insert(key, value);
            }
            TvlEntry::Nested(vaults) => tvl.extend(vaults),
        }
    }
    tvl
}

pub fn chain_display_name(chain: &str) -> String {
    let name = match chain {
        "avax" => "Avalanche",
        "bsc" => "BSC",
        "zkevm" => "Polygon zkEVM",
        "zksync" => "zkSync",
        other => {
            let mut chars = other.chars();
            return match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            };
        }
    };
    name.to_string()
}

/// Map one vault to a record for `protocol_id`
///
/// `apy` is in percent.
pub fn to_yield_record(vault: &BeefyVault, chain: &str, apy: f64, tvl: f64, protocol_id: i64) -> NewYieldRecord {
    let tags = std::iter::once("Beefy").chain(
        vault
            .assets
            .iter()
            .take(MAX_ASSET_TAGS)
            .map(String::as_str),
    );

    NewYieldRecord {
        protocol_id,
        pool_name: format!("{}-{}", vault.platform_id, vault.id),
        chain: chain_display_name(chain),
        asset: vault.name.clone(),
        apy,
        tvl,
        maturity_date: None,
        categories: Categories::new(tags),
        external_url: format!("https://app.beefy.finance/vault/{}", vault.id),
    }
}

pub struct BeefySource {
    client: ResilientHttpClient,
    base_url: String,
    chains: Vec<String>,
}

impl BeefySource {
    pub fn new(client: ResilientHttpClient) -> Self {
        Self::with_base_url(client, BEEFY_BASE_URL)
    }

    pub fn with_base_url(client: ResilientHttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chains: BEEFY_CHAINS.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_chains(mut self, chains: Vec<String>) -> Self {
        self.chains = chains;
        self
    }

    /// Fetch a lookup map, degrading to empty on failure
    async fn lookup<T: DeserializeOwned + Default>(&self, path: &str, what: &str) -> T {
        let url = format!("{}{}", self.base_url, path);
        match self.client.get_json(&url, BEEFY_SITE).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to fetch Beefy {} data, continuing without it: {}", what, e);
                T::default()
            }
        }
    }
}

#[async_trait]
impl YieldSource for BeefySource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn protocol(&self) -> NewProtocol {
        NewProtocol::new(
            "Beefy",
            "https://beefy.finance",
            "Beefy is a Decentralized, Multichain Yield Optimizer",
        )
    }

    async fn fetch(&self, protocol_id: i64) -> Result<Vec<NewYieldRecord>, SourceError> {
        let apy: HashMap<String, ApyBreakdown> = self.lookup("/apy/breakdown", "APY").await;
        let tvl = flatten_tvl(self.lookup("/tvl", "TVL").await);
        debug!(apy_entries = apy.len(), tvl_entries = tvl.len(), "Beefy lookups loaded");

        let mut records = Vec::new();
        let mut failed_chains = 0;
        let mut inactive = 0;

        for chain in &self.chains {
            let url = format!("{}/vaults/{}", self.base_url, chain);
            let vaults: Vec<BeefyVault> = match self.client.get_json(&url, BEEFY_SITE).await {
                Ok(vaults) => vaults,
                Err(e) => {
                    warn!(chain = %chain, "Failed to fetch Beefy vaults: {}", e);
                    failed_chains += 1;
                    continue;
                }
            };

            for vault in &vaults {
                if vault.status != "active" {
                    inactive += 1;
                    continue;
                }
                let vault_apy = apy
                    .get(&vault.id)
                    .and_then(|b| b.total_apy)
                    .unwrap_or(0.0)
                    * 100.0;
                let vault_tvl = tvl.get(&vault.id).copied().unwrap_or(0.0);
                records.push(to_yield_record(vault, chain, vault_apy, vault_tvl, protocol_id));
            }
        }

        if !self.chains.is_empty() && failed_chains == self.chains.len() {
            return Err(SourceError::Unavailable(format!(
                "Beefy vaults unavailable on all {} chains",
                failed_chains
            )));
        }

        info!(active = records.len(), inactive, failed_chains, "Beefy vaults fetched");
        Ok(records)
    }
}
