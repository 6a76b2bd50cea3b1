//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A DeFi protocol that owns yield records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Protocol fields supplied by a source; identity is the name
#[derive(Debug, Clone, PartialEq)]
pub struct NewProtocol {
    pub name: String,
    pub url: String,
    pub description: String,
}

impl NewProtocol {
    pub fn new(name: impl Into<String>, url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: description.into(),
        }
    }
}

/// One stored yield-bearing pool or market
///
/// `id` is the surrogate id, stable across refreshes. The natural key is
/// `(protocol_id, pool_name, chain)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldRecord {
    pub id: i64,
    pub protocol_id: i64,
    pub protocol_name: String,
    pub asset: String,
    pub chain: String,
    /// Annual percentage yield, in percent
    pub apy: f64,
    /// Total value locked, in USD
    pub tvl: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maturity_date: Option<DateTime<Utc>>,
    pub pool_name: String,
    /// Comma-joined tags, see [`Categories`]
    pub categories: String,
    pub external_url: String,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl YieldRecord {
    pub fn categories(&self) -> Categories {
        Categories::parse(&self.categories)
    }
}

/// A freshly fetched record, before it has a surrogate id
#[derive(Debug, Clone, PartialEq)]
pub struct NewYieldRecord {
    pub protocol_id: i64,
    pub pool_name: String,
    pub chain: String,
    pub asset: String,
    pub apy: f64,
    pub tvl: f64,
    pub maturity_date: Option<DateTime<Utc>>,
    pub categories: Categories,
    pub external_url: String,
}

/// Set of short tags attached to a record
///
/// Tags are trimmed, empty tags dropped and duplicates removed (first
/// occurrence wins). Stored joined with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Categories(Vec<String>);

impl Categories {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim();
            if !tag.is_empty() && !unique.iter().any(|t| t == tag) {
                unique.push(tag.to_string());
            }
        }
        Self(unique)
    }

    /// Parse the stored comma-joined form
    pub fn parse(stored: &str) -> Self {
        Self::new(stored.split(','))
    }

    pub fn tags(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_stored(&self) -> String {
        self.0.join(", ")
    }
}

impl fmt::Display for Categories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_stored())
    }
}

/// Column a yield listing is sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Apy,
    Tvl,
    UpdatedAt,
}

impl SortField {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apy" => Some(Self::Apy),
            "tvl" => Some(Self::Tvl),
            "updated_at" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apy => "apy",
            Self::Tvl => "tvl",
            Self::UpdatedAt => "updated_at",
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Apy => "yr.apy",
            Self::Tvl => "yr.tvl",
            Self::UpdatedAt => "yr.updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub(crate) fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Transient query descriptor for yield listings
///
/// Numeric bounds apply only when present and greater than zero; string
/// filters apply only when non-empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub min_apy: Option<f64>,
    pub max_apy: Option<f64>,
    pub min_tvl: Option<f64>,
    pub asset: Option<String>,
    pub chain: Option<String>,
    pub protocol: Option<String>,
    /// Substring match against the stored categories
    pub category: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_dedupe_and_trim() {
        let cats = Categories::new(["PT", " LRT ", "", "PT", "Liquidity"]);
        assert_eq!(cats.tags(), &["PT", "LRT", "Liquidity"]);
        assert_eq!(cats.to_stored(), "PT, LRT, Liquidity");
    }

    #[test]
    fn test_categories_parse_stored_form() {
        let cats = Categories::parse("Beefy, USDC,USDT , ");
        assert_eq!(cats.tags(), &["Beefy", "USDC", "USDT"]);
        assert!(Categories::parse("").is_empty());
    }

    #[test]
    fn test_sort_field_parse() {
        assert_eq!(SortField::parse("TVL"), Some(SortField::Tvl));
        assert_eq!(SortField::parse("updated_at"), Some(SortField::UpdatedAt));
        assert_eq!(SortField::parse("name"), None);
        assert_eq!(SortField::default(), SortField::Apy);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse("ASC"), Some(SortOrder::Asc));
        assert_eq!(SortOrder::parse("sideways"), None);
        assert_eq!(SortOrder::default(), SortOrder::Desc);
    }

    #[test]
    fn test_yield_record_json_omits_missing_maturity() {
        let now = Utc::now();
        let record = YieldRecord {
            id: 1,
            protocol_id: 1,
            protocol_name: "Beefy".to_string(),
            asset: "USDC-USDT LP".to_string(),
            chain: "Arbitrum".to_string(),
            apy: 4.2,
            tvl: 1_000_000.0,
            maturity_date: None,
            pool_name: "curve-usdc-usdt".to_string(),
            categories: "Beefy, USDC".to_string(),
            external_url: "https://app.beefy.finance/vault/curve-usdc-usdt".to_string(),
            updated_at: now,
            created_at: now,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("maturity_date").is_none());
        assert_eq!(json["protocol_name"], "Beefy");
        assert_eq!(json["apy"], 4.2);
    }
}
