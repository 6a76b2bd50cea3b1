//! External yield sources
//!
//! Each source fetches its native listings and maps them through its adapter
//! into [`NewYieldRecord`]s with the natural-key fields always populated.

use async_trait::async_trait;
use defirates_common::config::HttpSettings;
use defirates_common::db::{NewProtocol, NewYieldRecord};
use std::sync::Arc;
use thiserror::Error;

pub mod beefy;
pub mod http_client;
pub mod pendle;

pub use beefy::BeefySource;
pub use http_client::ResilientHttpClient;
pub use pendle::PendleSource;

/// Source fetch errors
///
/// These never escape a refresh cycle: the orchestrator logs them and treats
/// the source as having no records this cycle.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// A protocol API that yields records each refresh cycle
#[async_trait]
pub trait YieldSource: Send + Sync {
    /// Configuration name (`pendle`, `beefy`)
    fn name(&self) -> &str;

    /// Protocol row this source's records belong to
    fn protocol(&self) -> NewProtocol;

    /// Fetch current listings, already converted for `protocol_id`
    async fn fetch(&self, protocol_id: i64) -> Result<Vec<NewYieldRecord>, SourceError>;
}

/// Instantiate the configured sources in order
pub fn build_sources(
    names: &[String],
    http: &HttpSettings,
) -> defirates_common::Result<Vec<Arc<dyn YieldSource>>> {
    let mut sources: Vec<Arc<dyn YieldSource>> = Vec::with_capacity(names.len());

    for name in names {
        let client = ResilientHttpClient::new(http.clone()).map_err(|e| {
            defirates_common::Error::Config(format!("HTTP client for {}: {}", name, e))
        })?;

        let source: Arc<dyn YieldSource> = match name.as_str() {
            pendle::SOURCE_NAME => Arc::new(PendleSource::new(client)),
            beefy::SOURCE_NAME => Arc::new(BeefySource::new(client)),
            other => {
                return Err(defirates_common::Error::Config(format!(
                    "Unknown source '{}' (expected pendle or beefy)",
                    other
                )))
            }
        };
        sources.push(source);
    }

    Ok(sources)
}
