//! Aggregate cache
//!
//! Read-through cache in front of the stats repository. Entries expire on
//! a TTL, are evicted LRU when the cache is full, and can be invalidated
//! per key, per symbol, or wholesale after a scheduled import rewrites
//! history for every symbol.
//!
//! A reverse symbol index maps each symbol to the keys caching one of its
//! periods, so per-symbol invalidation does not scan the whole map.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{CryptoStats, StatsKey};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsCacheConfig {
    /// Master switch; disabled means every lookup misses
    pub enabled: bool,

    /// Maximum number of cached aggregates
    pub max_entries: usize,

    /// Entry time-to-live
    pub ttl: Duration,
}

impl Default for StatsCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
            ttl: Duration::from_secs(300),
        }
    }
}

struct CacheEntry {
    stats: CryptoStats,
    created_at: Instant,
    last_accessed: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Hit/miss counters, updated atomically.
#[derive(Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub invalidations: AtomicU64,
}

/// Cache of computed aggregates keyed by `(symbol, period)`.
pub struct StatsCache {
    config: StatsCacheConfig,
    entries: RwLock<HashMap<StatsKey, CacheEntry>>,
    symbol_index: RwLock<HashMap<String, HashSet<StatsKey>>>,
    stats: CacheStats,
}

impl StatsCache {
    /// Create an empty cache.
    pub fn new(config: StatsCacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            symbol_index: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Look up an aggregate. Expired entries count as misses and are
    /// removed in place.
    pub fn get(&self, key: &StatsKey) -> Option<CryptoStats> {
        if !self.config.enabled {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        enum Lookup {
            Hit(CryptoStats),
            Expired,
            Absent,
        }

        let lookup = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(self.config.ttl) => {
                    Lookup::Hit(entry.stats.clone())
                }
                Some(_) => Lookup::Expired,
                None => Lookup::Absent,
            }
        };

        match lookup {
            Lookup::Hit(stats) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                // Take the write lock only to bump recency.
                if let Some(entry) = self.entries.write().get_mut(key) {
                    entry.last_accessed = Instant::now();
                }
                Some(stats)
            }
            Lookup::Expired => {
                self.remove(key);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Lookup::Absent => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or refresh an aggregate, evicting the least recently used
    /// entry if the cache is full.
    pub fn put(&self, stats: CryptoStats) {
        if !self.config.enabled {
            return;
        }
        let key = stats.key();

        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            // O(n) scan is fine at the entry counts this cache runs at.
            if let Some(lru) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru);
                self.unindex(&lru);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %lru, "evicted LRU cache entry");
            }
        }

        let now = Instant::now();
        entries.insert(
            key.clone(),
            CacheEntry {
                stats,
                created_at: now,
                last_accessed: now,
            },
        );
        drop(entries);

        self.symbol_index
            .write()
            .entry(key.symbol.clone())
            .or_default()
            .insert(key);
    }

    /// Drop a single entry.
    pub fn invalidate(&self, key: &StatsKey) {
        if self.remove(key) {
            self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop every cached period of a symbol.
    pub fn invalidate_symbol(&self, symbol: &str) {
        let keys = match self.symbol_index.write().remove(symbol) {
            Some(keys) => keys,
            None => return,
        };
        let mut entries = self.entries.write();
        for key in &keys {
            if entries.remove(key).is_some() {
                self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(symbol, dropped = keys.len(), "invalidated cached aggregates for symbol");
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write();
        let dropped = entries.len();
        entries.clear();
        self.symbol_index.write().clear();
        self.stats
            .invalidations
            .fetch_add(dropped as u64, Ordering::Relaxed);
        debug!(dropped, "invalidated entire aggregate cache");
    }

    /// Number of live entries, including any not yet expired-checked.
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Fraction of lookups served from cache, 0.0 when nothing was asked.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Raw counters for metrics export.
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (
            self.stats.hits.load(Ordering::Relaxed),
            self.stats.misses.load(Ordering::Relaxed),
            self.stats.evictions.load(Ordering::Relaxed),
            self.stats.invalidations.load(Ordering::Relaxed),
        )
    }

    fn remove(&self, key: &StatsKey) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.unindex(key);
        }
        removed
    }

    fn unindex(&self, key: &StatsKey) {
        let mut index = self.symbol_index.write();
        if let Some(keys) = index.get_mut(&key.symbol) {
            keys.remove(key);
            if keys.is_empty() {
                index.remove(&key.symbol);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeRange;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn stats(symbol: &str, period: TimeRange) -> CryptoStats {
        CryptoStats {
            symbol: symbol.to_string(),
            period,
            oldest_price: dec("1"),
            newest_price: dec("2"),
            min_price: dec("1"),
            max_price: dec("2"),
            avg_price: dec("1.5"),
            normalized_range: dec("1.0000"),
        }
    }

    fn cache(max_entries: usize, ttl: Duration) -> StatsCache {
        StatsCache::new(StatsCacheConfig {
            enabled: true,
            max_entries,
            ttl,
        })
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let cache = cache(16, Duration::from_secs(60));
        let key = StatsKey::full_period("BTC");

        assert!(cache.get(&key).is_none());
        cache.put(stats("BTC", TimeRange::full()));
        assert!(cache.get(&key).is_some());

        let (hits, misses, _, _) = cache.counters();
        assert_eq!((hits, misses), (1, 1));
        assert_eq!(cache.hit_ratio(), 0.5);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = cache(16, Duration::from_millis(10));
        cache.put(stats("BTC", TimeRange::full()));

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&StatsKey::full_period("BTC")).is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = cache(2, Duration::from_secs(60));
        cache.put(stats("BTC", TimeRange::full()));
        std::thread::sleep(Duration::from_millis(5));
        cache.put(stats("ETH", TimeRange::full()));

        // Touch BTC so ETH becomes least recently used.
        std::thread::sleep(Duration::from_millis(5));
        cache.get(&StatsKey::full_period("BTC")).unwrap();

        cache.put(stats("XRP", TimeRange::full()));
        assert_eq!(cache.entry_count(), 2);
        assert!(cache.get(&StatsKey::full_period("ETH")).is_none());
        assert!(cache.get(&StatsKey::full_period("BTC")).is_some());
    }

    #[test]
    fn test_invalidate_symbol_drops_all_periods() {
        let cache = cache(16, Duration::from_secs(60));
        cache.put(stats("BTC", TimeRange::full()));
        cache.put(stats("BTC", TimeRange::new(0, 1000).unwrap()));
        cache.put(stats("ETH", TimeRange::full()));

        cache.invalidate_symbol("BTC");
        assert_eq!(cache.entry_count(), 1);
        assert!(cache.get(&StatsKey::full_period("ETH")).is_some());
    }

    #[test]
    fn test_invalidate_all() {
        let cache = cache(16, Duration::from_secs(60));
        cache.put(stats("BTC", TimeRange::full()));
        cache.put(stats("ETH", TimeRange::full()));

        cache.invalidate_all();
        assert_eq!(cache.entry_count(), 0);
        let (_, _, _, invalidations) = cache.counters();
        assert_eq!(invalidations, 2);
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = StatsCache::new(StatsCacheConfig {
            enabled: false,
            ..StatsCacheConfig::default()
        });
        cache.put(stats("BTC", TimeRange::full()));
        assert!(cache.get(&StatsKey::full_period("BTC")).is_none());
        assert_eq!(cache.entry_count(), 0);
    }
}
