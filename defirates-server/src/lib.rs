//! defirates-server library
//!
//! HTTP surface, external yield sources and the refresh loop for the DeFi
//! Rates service. Exposed as a library so integration tests can build the
//! router and drive refresh cycles directly.

use axum::routing::get;
use axum::Router;
use defirates_common::Broadcaster;
use sqlx::SqlitePool;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod refresh;
pub mod render;
pub mod sample_data;
pub mod sources;

pub use crate::error::{ApiError, ApiResult};
pub use crate::refresh::{LastRefresh, RefreshOrchestrator};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Record store
    pub db: SqlitePool,
    /// Fan-out hub for live-update streams
    pub broadcaster: Broadcaster,
    /// Server start, for uptime reporting
    pub startup_time: Instant,
    /// Completion time of the last successful refresh cycle
    pub last_refresh: LastRefresh,
}

impl AppState {
    pub fn new(db: SqlitePool, broadcaster: Broadcaster) -> Self {
        Self {
            db,
            broadcaster,
            startup_time: Instant::now(),
            last_refresh: LastRefresh::default(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::serve_index))
        .route("/events", get(api::event_stream))
        .route("/api/rates", get(api::get_rates))
        .route("/static/app.js", get(api::serve_app_js))
        .route("/static/style.css", get(api::serve_style_css))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
