//! Aggregation pipeline
//!
//! The [`Aggregator`] turns stored price points into [`CryptoStats`]
//! snapshots, persists them in the repository, and writes the fresh
//! result through to the cache so readers pick it up without a miss.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::StatsCache;
use crate::error::Error;
use crate::metrics;
use crate::storage::{PriceStore, StatsRepository};
use crate::types::{CryptoStats, TimeRange};

pub mod functions;

pub use functions::{calculate_stats, AVG_SCALE, RANGE_SCALE};

/// Outcome of an [`Aggregator::aggregate_all`] run.
#[derive(Debug, Default)]
pub struct AggregationReport {
    /// Symbols aggregated successfully
    pub succeeded: usize,

    /// Symbols with no data in the window
    pub empty: usize,

    /// Symbols whose aggregation failed, with the failure
    pub failures: Vec<(String, Error)>,
}

/// Computes and persists aggregates.
pub struct Aggregator {
    prices: Arc<dyn PriceStore>,
    repo: Arc<StatsRepository>,
    cache: Arc<StatsCache>,
}

impl Aggregator {
    /// Create an aggregator over the given stores.
    pub fn new(
        prices: Arc<dyn PriceStore>,
        repo: Arc<StatsRepository>,
        cache: Arc<StatsCache>,
    ) -> Self {
        Self { prices, repo, cache }
    }

    /// Aggregate one symbol over a window, persisting and caching the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the symbol has no points in the
    /// window.
    pub async fn aggregate_window(
        &self,
        symbol: &str,
        period: TimeRange,
    ) -> Result<CryptoStats, Error> {
        let points = self.prices.find_by_symbol_in_range(symbol, period).await?;
        if points.is_empty() {
            metrics::record_aggregation("empty");
            return Err(Error::NotFound(format!(
                "no price data for {} in period {}",
                symbol, period
            )));
        }

        let stats = match calculate_stats(symbol, &points, period) {
            Ok(stats) => stats,
            Err(e) => {
                metrics::record_aggregation("failed");
                return Err(e);
            }
        };

        self.repo.upsert(stats.clone());
        self.cache.put(stats.clone());
        metrics::record_aggregation("ok");
        Ok(stats)
    }

    /// Aggregate every stored symbol over a window.
    ///
    /// Per-symbol failures are collected in the report rather than
    /// aborting the run; one bad series must not block the rest.
    pub async fn aggregate_all(&self, period: TimeRange) -> Result<AggregationReport, Error> {
        let symbols = self.prices.symbols().await?;
        let mut report = AggregationReport::default();

        for symbol in symbols {
            match self.aggregate_window(&symbol, period).await {
                Ok(_) => report.succeeded += 1,
                Err(Error::NotFound(_)) => report.empty += 1,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "aggregation failed for symbol");
                    report.failures.push((symbol, e));
                }
            }
        }

        metrics::record_cache_state(self.cache.entry_count(), self.cache.hit_ratio());
        info!(
            succeeded = report.succeeded,
            empty = report.empty,
            failed = report.failures.len(),
            period = %period,
            "aggregation run complete"
        );
        Ok(report)
    }
}
