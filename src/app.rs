//! Application service
//!
//! [`RecommendationService`] is the read side of the system: clients ask
//! for a symbol's statistics or for symbols ranked by volatility, and
//! the service answers from cache when it can, from the repository when
//! the cache misses, and by recomputing from raw points only when
//! neither holds the answer.
//!
//! Cache misses for the same key are single-flighted: concurrent readers
//! wait on a per-key gate while the first one recomputes, so a popular
//! symbol's expiry does not stampede the price store.

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::aggregation::{calculate_stats, Aggregator};
use crate::cache::StatsCache;
use crate::error::{Error, Result};
use crate::metrics;
use crate::ratelimit::KeyedRateLimiter;
use crate::storage::{PriceStore, StatsRepository};
use crate::symbols::{is_valid_ticker, SymbolValidator};
use crate::types::{CryptoStats, StatsKey, TimeRange};

/// Read-side service over the aggregation pipeline.
pub struct RecommendationService {
    prices: Arc<dyn PriceStore>,
    repo: Arc<StatsRepository>,
    cache: Arc<StatsCache>,
    validator: Arc<dyn SymbolValidator>,
    rate_limiter: Arc<KeyedRateLimiter>,
    aggregator: Aggregator,
    inflight: DashMap<StatsKey, Arc<Mutex<()>>>,
}

impl RecommendationService {
    /// Wire the service over shared components.
    pub fn new(
        prices: Arc<dyn PriceStore>,
        repo: Arc<StatsRepository>,
        cache: Arc<StatsCache>,
        validator: Arc<dyn SymbolValidator>,
        rate_limiter: Arc<KeyedRateLimiter>,
    ) -> Self {
        let aggregator = Aggregator::new(prices.clone(), repo.clone(), cache.clone());
        Self {
            prices,
            repo,
            cache,
            validator,
            rate_limiter,
            aggregator,
            inflight: DashMap::new(),
        }
    }

    /// Full-history statistics for one symbol.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidData`] when the input is not ticker-shaped
    /// - [`Error::UnsupportedSymbol`] when the symbol is not served
    /// - [`Error::NotFound`] when no data exists for the symbol
    pub async fn get_stats(&self, symbol: &str) -> Result<CryptoStats> {
        if !is_valid_ticker(symbol) {
            return Err(Error::InvalidData(format!(
                "malformed ticker: {:?}",
                symbol
            )));
        }
        if !self.validator.is_supported(symbol) {
            return Err(Error::UnsupportedSymbol(symbol.to_string()));
        }

        let key = StatsKey::full_period(symbol);
        if let Some(stats) = self.cache.get(&key) {
            return Ok(stats);
        }
        self.load_stats(key).await
    }

    /// Like [`get_stats`] but charged against `client`'s rate limit
    /// first; a rejected request consumes no other work.
    ///
    /// [`get_stats`]: RecommendationService::get_stats
    pub async fn get_stats_for_client(&self, client: &str, symbol: &str) -> Result<CryptoStats> {
        self.charge(client)?;
        self.get_stats(symbol).await
    }

    /// All full-history aggregates sorted by normalized range,
    /// most volatile first.
    pub async fn sorted_by_range(&self) -> Result<Vec<CryptoStats>> {
        let mut all: Vec<CryptoStats> = self
            .repo
            .all()
            .into_iter()
            .filter(|stats| stats.period.is_full())
            .collect();
        all.sort_by(|a, b| b.normalized_range.cmp(&a.normalized_range));
        Ok(all)
    }

    /// The symbol with the highest normalized range on a UTC calendar
    /// day, or `None` when no symbol has data that day.
    ///
    /// Computed directly from raw points; day queries are ad hoc and not
    /// worth cache space.
    pub async fn highest_range_for_date(&self, date: NaiveDate) -> Result<Option<CryptoStats>> {
        let window = TimeRange::utc_day(date);
        let points = self.prices.find_in_range(window).await?;

        let mut by_symbol: std::collections::HashMap<String, Vec<_>> =
            std::collections::HashMap::new();
        for point in points {
            by_symbol.entry(point.symbol.clone()).or_default().push(point);
        }

        let mut best: Option<CryptoStats> = None;
        for (symbol, points) in by_symbol {
            let stats = calculate_stats(&symbol, &points, window)?;
            let beats = best
                .as_ref()
                .map(|b| stats.normalized_range > b.normalized_range)
                .unwrap_or(true);
            if beats {
                best = Some(stats);
            }
        }
        Ok(best)
    }

    /// Like [`sorted_by_range`] but charged against `client`'s rate limit.
    ///
    /// [`sorted_by_range`]: RecommendationService::sorted_by_range
    pub async fn sorted_by_range_for_client(&self, client: &str) -> Result<Vec<CryptoStats>> {
        self.charge(client)?;
        self.sorted_by_range().await
    }

    /// Like [`highest_range_for_date`] but charged against `client`'s
    /// rate limit.
    ///
    /// [`highest_range_for_date`]: RecommendationService::highest_range_for_date
    pub async fn highest_range_for_date_for_client(
        &self,
        client: &str,
        date: NaiveDate,
    ) -> Result<Option<CryptoStats>> {
        self.charge(client)?;
        self.highest_range_for_date(date).await
    }

    /// Symbols the service answers for, sorted.
    pub fn supported_symbols(&self) -> Vec<String> {
        self.validator.supported_symbols()
    }

    /// Take one token from the client's bucket or fail fast.
    fn charge(&self, client: &str) -> Result<()> {
        if !self.rate_limiter.try_acquire(client) {
            metrics::RATE_LIMIT_REJECTIONS.inc();
            return Err(Error::RateLimitExceeded(client.to_string()));
        }
        Ok(())
    }

    /// Miss path: consult the repository, recompute only if it is empty
    /// too, with concurrent misses for the same key collapsed to one
    /// computation.
    async fn load_stats(&self, key: StatsKey) -> Result<CryptoStats> {
        let gate = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _held = gate.lock().await;

        // A concurrent holder may have filled the cache while we waited.
        if let Some(stats) = self.cache.get(&key) {
            return Ok(stats);
        }

        // The gate stays in the map after the miss resolves. Dropping it
        // here would let a late waiter grab a fresh gate and recompute in
        // parallel, and the map is bounded by the supported key set anyway.
        match self.repo.get(&key) {
            Some(stats) => {
                self.cache.put(stats.clone());
                Ok(stats)
            }
            None => {
                debug!(key = %key, "aggregate missing, recomputing from price points");
                self.aggregator.aggregate_window(&key.symbol, key.period).await
            }
        }
    }
}
