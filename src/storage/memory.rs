//! In-memory storage backends
//!
//! [`MemoryPriceStore`] keeps one ordered map per symbol, keyed by
//! timestamp, which makes range scans and duplicate detection cheap.
//! [`StatsRepository`] holds the latest computed aggregate per
//! `(symbol, period)` key; each aggregation run overwrites the previous
//! snapshot for the same key.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::error::StorageError;
use crate::types::{CryptoStats, PricePoint, StatsKey, TimeRange};

use super::PriceStore;

/// Thread-safe in-memory price store.
#[derive(Default)]
pub struct MemoryPriceStore {
    /// symbol -> (timestamp -> price)
    series: RwLock<HashMap<String, BTreeMap<i64, Decimal>>>,
}

impl MemoryPriceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceStore for MemoryPriceStore {
    async fn insert_batch(&self, points: Vec<PricePoint>) -> Result<usize, StorageError> {
        let mut series = self.series.write();
        let mut inserted = 0;

        for point in points {
            let per_symbol = series.entry(point.symbol).or_default();
            // Do-nothing upsert: the first write for a timestamp wins.
            if let std::collections::btree_map::Entry::Vacant(slot) =
                per_symbol.entry(point.timestamp)
            {
                slot.insert(point.price);
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<PricePoint>, StorageError> {
        let series = self.series.read();
        Ok(series
            .get(symbol)
            .map(|per_symbol| {
                per_symbol
                    .iter()
                    .map(|(&timestamp, &price)| PricePoint {
                        timestamp,
                        symbol: symbol.to_string(),
                        price,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_by_symbol_in_range(
        &self,
        symbol: &str,
        range: TimeRange,
    ) -> Result<Vec<PricePoint>, StorageError> {
        let series = self.series.read();
        Ok(series
            .get(symbol)
            .map(|per_symbol| {
                per_symbol
                    .range(range.start..=range.end)
                    .map(|(&timestamp, &price)| PricePoint {
                        timestamp,
                        symbol: symbol.to_string(),
                        price,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_in_range(&self, range: TimeRange) -> Result<Vec<PricePoint>, StorageError> {
        let series = self.series.read();
        let mut points = Vec::new();
        for (symbol, per_symbol) in series.iter() {
            for (&timestamp, &price) in per_symbol.range(range.start..=range.end) {
                points.push(PricePoint {
                    timestamp,
                    symbol: symbol.clone(),
                    price,
                });
            }
        }
        Ok(points)
    }

    async fn symbols(&self) -> Result<Vec<String>, StorageError> {
        let series = self.series.read();
        let mut symbols: Vec<String> = series
            .iter()
            .filter(|(_, per_symbol)| !per_symbol.is_empty())
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn len(&self) -> Result<usize, StorageError> {
        let series = self.series.read();
        Ok(series.values().map(|per_symbol| per_symbol.len()).sum())
    }
}

/// Repository of computed aggregates keyed by `(symbol, period)`.
///
/// Upserts overwrite: the repository always reflects the most recent
/// successful aggregation run for each key.
#[derive(Default)]
pub struct StatsRepository {
    entries: DashMap<StatsKey, CryptoStats>,
}

impl StatsRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the aggregate for its key.
    pub fn upsert(&self, stats: CryptoStats) {
        self.entries.insert(stats.key(), stats);
    }

    /// Get the aggregate for a key, if one has been computed.
    pub fn get(&self, key: &StatsKey) -> Option<CryptoStats> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// All stored aggregates.
    pub fn all(&self) -> Vec<CryptoStats> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of stored aggregates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
