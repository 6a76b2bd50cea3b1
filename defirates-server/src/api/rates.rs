//! Row re-sync endpoint
//!
//! Live views post back the ids of the rows they currently show and get the
//! fresh rows for exactly those ids. Ids that no longer exist are omitted.

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Response},
    Json,
};
use defirates_common::db::get_yield_records_by_ids;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::render::render_rows;
use crate::AppState;

/// Upper bound on ids accepted in one request
const MAX_IDS: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct RatesByIdQuery {
    /// Comma-separated surrogate ids
    pub ids: Option<String>,
    /// `html` (default) or `json`
    pub format: Option<String>,
}

/// Parse `1, 2,x,3` into `[1, 2, 3]`, skipping unparseable tokens
pub fn parse_ids(raw: &str) -> Vec<i64> {
    let mut ids: Vec<i64> = raw
        .split(',')
        .filter_map(|token| token.trim().parse().ok())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids.truncate(MAX_IDS);
    ids
}

/// GET /api/rates?ids=1,2,3
pub async fn get_rates(
    State(state): State<AppState>,
    Query(query): Query<RatesByIdQuery>,
) -> ApiResult<Response> {
    let ids = query.ids.as_deref().map(parse_ids).unwrap_or_default();
    let records = get_yield_records_by_ids(&state.db, &ids).await?;
    debug!(requested = ids.len(), found = records.len(), "Row re-sync");

    match query.format.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("html") => Ok(Html(render_rows(&records)).into_response()),
        Some("json") => Ok(Json(records).into_response()),
        Some(other) => Err(ApiError::BadRequest(format!(
            "Unsupported format '{}' (expected html or json)",
            other
        ))),
    }
}
