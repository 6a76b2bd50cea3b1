//! Rates page
//!
//! Full page on normal navigation; only the table partial when the request
//! carries `HX-Request: true`.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Html,
};
use defirates_common::db::{
    distinct_assets, distinct_categories, distinct_chains, distinct_protocols,
    query_yield_records, FilterSpec, SortField, SortOrder,
};
use serde::Deserialize;
use tracing::warn;

use crate::error::ApiResult;
use crate::render::{render_page, render_table, PageContext};
use crate::AppState;

/// Raw filter query parameters
///
/// Numbers arrive as text so an unparseable value is ignored rather than
/// rejecting the whole request.
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    pub min_apy: Option<String>,
    pub max_apy: Option<String>,
    pub min_tvl: Option<String>,
    pub asset: Option<String>,
    pub chain: Option<String>,
    pub protocol: Option<String>,
    pub categories: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl FilterQuery {
    pub fn to_filter(&self) -> FilterSpec {
        FilterSpec {
            min_apy: parse_number(&self.min_apy),
            max_apy: parse_number(&self.max_apy),
            min_tvl: parse_number(&self.min_tvl),
            asset: non_empty(&self.asset),
            chain: non_empty(&self.chain),
            protocol: non_empty(&self.protocol),
            category: non_empty(&self.categories),
            sort_by: self
                .sort_by
                .as_deref()
                .and_then(SortField::parse)
                .unwrap_or_default(),
            sort_order: self
                .sort_order
                .as_deref()
                .and_then(SortOrder::parse)
                .unwrap_or_default(),
        }
    }
}

fn parse_number(raw: &Option<String>) -> Option<f64> {
    raw.as_deref()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn non_empty(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_htmx(headers: &HeaderMap) -> bool {
    headers
        .get("HX-Request")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// GET /
pub async fn serve_index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> ApiResult<Html<String>> {
    let filter = query.to_filter();
    let records = query_yield_records(&state.db, &filter).await?;

    if is_htmx(&headers) {
        return Ok(Html(render_table(&records, &filter)));
    }

    // Filter options are a convenience; the table still renders without them
    let assets = distinct_assets(&state.db).await.unwrap_or_else(|e| {
        warn!("Failed to load assets: {}", e);
        Vec::new()
    });
    let chains = distinct_chains(&state.db).await.unwrap_or_else(|e| {
        warn!("Failed to load chains: {}", e);
        Vec::new()
    });
    let protocols = distinct_protocols(&state.db).await.unwrap_or_else(|e| {
        warn!("Failed to load protocols: {}", e);
        Vec::new()
    });
    let categories = distinct_categories(&state.db).await.unwrap_or_else(|e| {
        warn!("Failed to load categories: {}", e);
        Vec::new()
    });

    let page = render_page(&PageContext {
        records: &records,
        filter: &filter,
        assets: &assets,
        chains: &chains,
        protocols: &protocols,
        categories: &categories,
        last_refresh: state.last_refresh.get().await,
    });

    Ok(Html(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_query_defaults() {
        let filter = FilterQuery::default().to_filter();
        assert_eq!(filter, FilterSpec::default());
    }

    #[test]
    fn test_filter_query_ignores_bad_values() {
        let query = FilterQuery {
            min_apy: Some("abc".to_string()),
            max_apy: Some("NaN".to_string()),
            min_tvl: Some(" 1000 ".to_string()),
            asset: Some("   ".to_string()),
            categories: Some("LRT".to_string()),
            sort_by: Some("name".to_string()),
            sort_order: Some("asc".to_string()),
            ..Default::default()
        };
        let filter = query.to_filter();

        assert_eq!(filter.min_apy, None);
        assert_eq!(filter.max_apy, None);
        assert_eq!(filter.min_tvl, Some(1000.0));
        assert_eq!(filter.asset, None);
        assert_eq!(filter.category.as_deref(), Some("LRT"));
        assert_eq!(filter.sort_by, SortField::Apy);
        assert_eq!(filter.sort_order, SortOrder::Asc);
    }
}
