//! End-to-end tests for the import + aggregation + read pipeline
//!
//! Covers the full cycle the daemon runs in production:
//! 1. CSV files land in an import directory
//! 2. A lock-guarded run imports them and recomputes aggregates
//! 3. Reads are served from cache, rate limited per client
//! 4. A re-run over the same files changes nothing

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use recommendations::aggregation::Aggregator;
use recommendations::cache::{StatsCache, StatsCacheConfig};
use recommendations::error::StorageError;
use recommendations::ingestion::{CsvImporter, ImportConfig};
use recommendations::lock::{LockProvider, MemoryLockProvider};
use recommendations::ratelimit::{KeyedRateLimiter, RateLimitConfig};
use recommendations::services::{ImportService, ImportServiceConfig};
use recommendations::storage::{MemoryPriceStore, PriceStore, StatsRepository};
use recommendations::symbols::SetBasedSymbolValidator;
use recommendations::types::{PricePoint, TimeRange};
use recommendations::{Error, RecommendationService};

// ============================================================================
// Fixtures
// ============================================================================

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn write_fixtures(dir: &Path) {
    std::fs::write(
        dir.join("BTC_values.csv"),
        "timestamp,symbol,price\n\
         1641009600000,BTC,46813.21\n\
         1641020400000,BTC,46979.61\n\
         1641031200000,BTC,47143.98\n\
         1641042000000,BTC,46871.09\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("ETH_values.csv"),
        "timestamp,symbol,price\n\
         1641009600000,ETH,3715.32\n\
         1641020400000,ETH,3718.67\n\
         1641031200000,ETH,3697.04\n",
    )
    .unwrap();
}

/// Store wrapper counting read operations, to prove cache hits never
/// reach storage.
struct CountingStore {
    inner: MemoryPriceStore,
    reads: AtomicU64,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryPriceStore::new(),
            reads: AtomicU64::new(0),
        }
    }

    fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceStore for CountingStore {
    async fn insert_batch(&self, points: Vec<PricePoint>) -> Result<usize, StorageError> {
        self.inner.insert_batch(points).await
    }

    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<PricePoint>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_symbol(symbol).await
    }

    async fn find_by_symbol_in_range(
        &self,
        symbol: &str,
        range: TimeRange,
    ) -> Result<Vec<PricePoint>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_symbol_in_range(symbol, range).await
    }

    async fn find_in_range(&self, range: TimeRange) -> Result<Vec<PricePoint>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_in_range(range).await
    }

    async fn symbols(&self) -> Result<Vec<String>, StorageError> {
        self.inner.symbols().await
    }

    async fn len(&self) -> Result<usize, StorageError> {
        self.inner.len().await
    }
}

struct Pipeline {
    store: Arc<CountingStore>,
    import_service: ImportService,
    service: RecommendationService,
}

fn build_pipeline(dir: &Path, rate_limit: RateLimitConfig) -> Pipeline {
    let store = Arc::new(CountingStore::new());
    let prices: Arc<dyn PriceStore> = store.clone();
    let repo = Arc::new(StatsRepository::new());
    let cache = Arc::new(StatsCache::new(StatsCacheConfig::default()));

    let importer = Arc::new(CsvImporter::new(
        prices.clone(),
        ImportConfig {
            directory: dir.to_path_buf(),
            batch_size: 2,
        },
    ));
    let aggregator = Arc::new(Aggregator::new(prices.clone(), repo.clone(), cache.clone()));

    let import_service = ImportService::new(
        ImportServiceConfig {
            lock_at_least_for: Duration::ZERO,
            ..ImportServiceConfig::default()
        },
        Arc::new(MemoryLockProvider::new()),
        importer,
        aggregator,
        cache.clone(),
    );

    let service = RecommendationService::new(
        prices,
        repo,
        cache,
        Arc::new(SetBasedSymbolValidator::new(["BTC", "ETH", "LTC"])),
        Arc::new(KeyedRateLimiter::new(rate_limit)),
    );

    Pipeline {
        store,
        import_service,
        service,
    }
}

fn open_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        enabled: false,
        ..RateLimitConfig::default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_import_aggregate_read_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let pipeline = build_pipeline(dir.path(), open_rate_limit());
    let summary = pipeline.import_service.run_once().await.unwrap().unwrap();
    assert_eq!(summary.files, 2);
    assert_eq!(summary.total_rows, 7);
    assert_eq!(summary.inserted, 7);

    let btc = pipeline.service.get_stats("BTC").await.unwrap();
    assert_eq!(btc.oldest_price, dec("46813.21"));
    assert_eq!(btc.newest_price, dec("46871.09"));
    assert_eq!(btc.min_price, dec("46813.21"));
    assert_eq!(btc.max_price, dec("47143.98"));
    // (47143.98 - 46813.21) / 46813.21 = 0.0071 at scale 4
    assert_eq!(btc.normalized_range, dec("0.0071"));

    let ranked = pipeline.service.sorted_by_range().await.unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].symbol, "BTC");
}

#[tokio::test]
async fn test_cached_reads_avoid_storage() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let pipeline = build_pipeline(dir.path(), open_rate_limit());
    pipeline.import_service.run_once().await.unwrap().unwrap();

    let after_run = pipeline.store.read_count();
    for _ in 0..20 {
        pipeline.service.get_stats("BTC").await.unwrap();
        pipeline.service.get_stats("ETH").await.unwrap();
    }
    // The scheduled run already wrote aggregates through to the cache.
    assert_eq!(pipeline.store.read_count(), after_run);
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let pipeline = build_pipeline(dir.path(), open_rate_limit());
    pipeline.import_service.run_once().await.unwrap().unwrap();
    let first = pipeline.service.get_stats("BTC").await.unwrap();

    let rerun = pipeline.import_service.run_once().await.unwrap().unwrap();
    assert_eq!(rerun.inserted, 0);
    assert_eq!(rerun.skipped, 7);

    let second = pipeline.service.get_stats("BTC").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_damaged_rows_do_not_block_import() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("LTC_values.csv"),
        "timestamp,symbol,price\n\
         1641009600000,LTC,145.10\n\
         garbage line without commas\n\
         1641020400000,LTC,0\n\
         1641031200000,LTC,148.52\n",
    )
    .unwrap();

    let pipeline = build_pipeline(dir.path(), open_rate_limit());
    let summary = pipeline.import_service.run_once().await.unwrap().unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.skipped, 2);

    let ltc = pipeline.service.get_stats("LTC").await.unwrap();
    assert_eq!(ltc.min_price, dec("145.10"));
    assert_eq!(ltc.max_price, dec("148.52"));
}

#[tokio::test]
async fn test_rate_limit_burst_of_fifteen() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let pipeline = build_pipeline(
        dir.path(),
        RateLimitConfig {
            enabled: true,
            capacity: 10,
            refill_tokens: 1,
            refill_period: Duration::from_secs(1),
            bucket_ttl: Duration::from_secs(3600),
        },
    );
    pipeline.import_service.run_once().await.unwrap().unwrap();

    let mut admitted = 0;
    let mut rejected = 0;
    for _ in 0..15 {
        match pipeline.service.get_stats_for_client("10.0.0.1", "BTC").await {
            Ok(_) => admitted += 1,
            Err(Error::RateLimitExceeded(_)) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(admitted, 10);
    assert_eq!(rejected, 5);

    // A different client gets a fresh bucket.
    assert!(pipeline
        .service
        .get_stats_for_client("10.0.0.2", "BTC")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_concurrent_cold_reads_hit_storage_once() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    // Seed the store directly; no aggregates exist yet, so the first
    // read must recompute from raw points.
    let pipeline = build_pipeline(dir.path(), open_rate_limit());
    pipeline
        .store
        .insert_batch(vec![
            PricePoint::new(1000, "BTC", dec("30000")).unwrap(),
            PricePoint::new(2000, "BTC", dec("50000")).unwrap(),
        ])
        .await
        .unwrap();

    let store = pipeline.store.clone();
    let svc = Arc::new(pipeline.service);
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.get_stats("BTC").await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    // Every reader past the first was answered from cache.
    assert_eq!(store.read_count(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_execute_once() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    // Two instances share one lock provider and one store, as a fleet
    // sharing a database would.
    let lock: Arc<dyn LockProvider> = Arc::new(MemoryLockProvider::new());
    let prices: Arc<dyn PriceStore> = Arc::new(MemoryPriceStore::new());

    let mut services = Vec::new();
    for _ in 0..2 {
        let repo = Arc::new(StatsRepository::new());
        let cache = Arc::new(StatsCache::new(StatsCacheConfig::default()));
        let importer = Arc::new(CsvImporter::new(
            prices.clone(),
            ImportConfig {
                directory: dir.path().to_path_buf(),
                batch_size: 100,
            },
        ));
        let aggregator = Arc::new(Aggregator::new(prices.clone(), repo.clone(), cache.clone()));
        services.push(Arc::new(ImportService::new(
            ImportServiceConfig::default(),
            lock.clone(),
            importer,
            aggregator,
            cache,
        )));
    }

    let handles: Vec<_> = services
        .iter()
        .map(|service| {
            let service = service.clone();
            tokio::spawn(async move { service.run_once().await })
        })
        .collect();

    let mut executed = 0;
    let mut skipped = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Some(_) => executed += 1,
            None => skipped += 1,
        }
    }
    assert_eq!(executed, 1);
    assert_eq!(skipped, 1);
    assert_eq!(prices.len().await.unwrap(), 7);
}

#[tokio::test]
async fn test_highest_range_for_date() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let pipeline = build_pipeline(dir.path(), open_rate_limit());
    pipeline.import_service.run_once().await.unwrap().unwrap();

    // All fixture points fall on 2022-01-01 UTC.
    let day = chrono::NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
    let best = pipeline
        .service
        .highest_range_for_date(day)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(best.symbol, "BTC");

    let quiet_day = chrono::NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
    assert!(pipeline
        .service
        .highest_range_for_date(quiet_day)
        .await
        .unwrap()
        .is_none());
}
