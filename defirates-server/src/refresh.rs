//! Refresh orchestrator
//!
//! Runs the fetch → upsert pipeline for every configured source on a fixed
//! interval. The first tick fires immediately, so the first cycle runs as
//! soon as the loop is spawned (after the HTTP listener is bound; existing
//! data is served meanwhile).
//!
//! Exactly one `update` notification is published per completed cycle,
//! after all of its upserts have been applied, even when every source
//! failed. Clients use it to re-sync and refresh their freshness indicator.
//!
//! A source whose protocol row cannot be written is recorded and skipped.
//! Only a database failure stops the cycle early; records stored before it
//! are still announced.

use chrono::{DateTime, Utc};
use defirates_common::db::{count_yield_records_for_protocol, upsert_protocol, upsert_yield_records};
use defirates_common::events::PublishReport;
use defirates_common::{Broadcaster, Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sources::YieldSource;

/// Completion time of the last successful cycle, shared with `/health`
#[derive(Debug, Clone, Default)]
pub struct LastRefresh(Arc<RwLock<Option<DateTime<Utc>>>>);

impl LastRefresh {
    pub async fn get(&self) -> Option<DateTime<Utc>> {
        *self.0.read().await
    }

    pub async fn set(&self, at: DateTime<Utc>) {
        *self.0.write().await = Some(at);
    }
}

/// Outcome of one source within a cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: String,
    /// Records returned by the source
    pub fetched: usize,
    pub stored: usize,
    pub failed: usize,
    pub fetch_error: Option<String>,
    /// Protocol row could not be written or counted; the source was skipped
    pub store_error: Option<String>,
    /// Records already held for this protocol before the cycle
    pub prior_records: i64,
}

/// Outcome of one refresh cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub sources: Vec<SourceReport>,
    pub publish: PublishReport,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn total_stored(&self) -> usize {
        self.sources.iter().map(|s| s.stored).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.sources.iter().map(|s| s.failed).sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.fetch_error.is_some() || s.store_error.is_some())
            .count()
    }
}

pub struct RefreshOrchestrator {
    pool: SqlitePool,
    sources: Vec<Arc<dyn YieldSource>>,
    broadcaster: Broadcaster,
    last_refresh: LastRefresh,
    cycles: AtomicU64,
}

impl RefreshOrchestrator {
    pub fn new(pool: SqlitePool, sources: Vec<Arc<dyn YieldSource>>, broadcaster: Broadcaster) -> Self {
        Self {
            pool,
            sources,
            broadcaster,
            last_refresh: LastRefresh::default(),
            cycles: AtomicU64::new(0),
        }
    }

    /// Record cycle completions into an existing shared handle
    pub fn with_last_refresh(mut self, last_refresh: LastRefresh) -> Self {
        self.last_refresh = last_refresh;
        self
    }

    pub fn last_refresh(&self) -> LastRefresh {
        self.last_refresh.clone()
    }

    /// Run one fetch → upsert → notify cycle
    ///
    /// Source fetch failures, protocol rows rejected by the store and
    /// individual record failures are recorded in the report and the cycle
    /// moves on. A database error means the store itself is unusable: the
    /// cycle stops with that error, publishing only if records were already
    /// stored this cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        info!(cycle, sources = self.sources.len(), "Refresh cycle started");

        let mut reports: Vec<SourceReport> = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let mut report = SourceReport {
                source: source.name().to_string(),
                ..Default::default()
            };

            let protocol_id = match self.prepare_protocol(source.as_ref()).await {
                Ok((protocol_id, prior_records)) => {
                    report.prior_records = prior_records;
                    protocol_id
                }
                Err(e @ Error::Database(_)) => {
                    let stored: usize = reports.iter().map(|r| r.stored).sum();
                    error!(cycle, source = source.name(), "Store unavailable, aborting cycle: {}", e);
                    if stored > 0 {
                        let publish = self.broadcaster.publish_data_changed().await;
                        info!(
                            cycle,
                            stored,
                            notified = publish.delivered,
                            "Announced records stored before the abort"
                        );
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(cycle, source = source.name(), "Skipping source: {}", e);
                    report.store_error = Some(e.to_string());
                    reports.push(report);
                    continue;
                }
            };

            match source.fetch(protocol_id).await {
                Ok(records) => {
                    report.fetched = records.len();
                    let outcome = upsert_yield_records(&self.pool, &records).await;
                    report.stored = outcome.stored.len();
                    report.failed = outcome.failed;
                }
                Err(e) => {
                    warn!(cycle, source = source.name(), "Fetch failed: {}", e);
                    if report.prior_records > 0 {
                        info!(
                            cycle,
                            source = source.name(),
                            "Keeping {} previously stored records",
                            report.prior_records
                        );
                    }
                    report.fetch_error = Some(e.to_string());
                }
            }

            info!(
                cycle,
                source = %report.source,
                fetched = report.fetched,
                stored = report.stored,
                failed = report.failed,
                "Source refreshed"
            );
            reports.push(report);
        }

        let publish = self.broadcaster.publish_data_changed().await;
        self.last_refresh.set(Utc::now()).await;

        let report = CycleReport {
            cycle,
            sources: reports,
            publish,
            elapsed: started.elapsed(),
        };

        info!(
            cycle,
            stored = report.total_stored(),
            failed = report.total_failed(),
            failed_sources = report.failed_sources(),
            notified = publish.delivered,
            skipped = publish.skipped,
            "Refresh cycle complete in {:?}",
            report.elapsed
        );

        Ok(report)
    }

    /// Upsert the source's protocol row; returns its id and current record count
    async fn prepare_protocol(&self, source: &dyn YieldSource) -> Result<(i64, i64)> {
        let protocol = upsert_protocol(&self.pool, &source.protocol()).await?;
        let prior_records = count_yield_records_for_protocol(&self.pool, protocol.id).await?;
        Ok((protocol.id, prior_records))
    }

    /// Run cycles every `interval` until `shutdown` is cancelled
    ///
    /// A failed cycle is logged and the loop waits for the next tick.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Refresh loop started (interval {:?})", interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = ticker.tick() => {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => {
                            info!("Refresh cycle interrupted by shutdown");
                            break;
                        }

                        result = self.run_cycle() => {
                            if let Err(e) = result {
                                error!("Refresh cycle failed: {}", e);
                            }
                        }
                    }
                }
            }
        }

        info!("Refresh loop stopped");
    }
}
