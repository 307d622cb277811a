//! Scheduled Import Service
//!
//! Periodically loads CSV price data, recomputes aggregates, and
//! refreshes the cache. Every tick races for the scheduler lock first;
//! instances that lose the race skip the tick entirely, so a fleet
//! sharing one import directory performs each run exactly once.
//!
//! A completed run invalidates the whole aggregate cache before
//! recomputing: an import may rewrite history for any symbol, and a
//! stale aggregate is worse than a cold cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::aggregation::Aggregator;
use crate::cache::StatsCache;
use crate::error::Error;
use crate::ingestion::{CsvImporter, ImportSummary};
use crate::lock::LockProvider;
use crate::metrics;
use crate::types::TimeRange;

use super::framework::{Service, ServiceError, ServiceStatus};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the scheduled import service
#[derive(Debug, Clone)]
pub struct ImportServiceConfig {
    /// Time between scheduled runs
    pub run_interval: Duration,

    /// Name of the scheduler lock
    pub lock_name: String,

    /// Upper bound on lock validity if the holder dies
    pub lock_at_most_for: Duration,

    /// Minimum hold time, absorbs clock skew between instances
    pub lock_at_least_for: Duration,
}

impl Default for ImportServiceConfig {
    fn default() -> Self {
        Self {
            run_interval: Duration::from_secs(60),
            lock_name: "importLock".to_string(),
            lock_at_most_for: Duration::from_secs(600),
            lock_at_least_for: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for scheduled runs.
#[derive(Default)]
pub struct ImportServiceStats {
    /// Runs that executed on this instance
    pub runs_executed: AtomicU64,

    /// Runs skipped because the lock was held elsewhere
    pub runs_skipped: AtomicU64,

    /// Runs that failed
    pub runs_failed: AtomicU64,
}

// ============================================================================
// Import Service
// ============================================================================

/// Background service executing the import + aggregate + refresh cycle.
pub struct ImportService {
    config: ImportServiceConfig,
    lock: Arc<dyn LockProvider>,
    importer: Arc<CsvImporter>,
    aggregator: Arc<Aggregator>,
    cache: Arc<StatsCache>,
    status: RwLock<ServiceStatus>,
    stats: ImportServiceStats,
}

impl ImportService {
    /// Create the service over shared components.
    pub fn new(
        config: ImportServiceConfig,
        lock: Arc<dyn LockProvider>,
        importer: Arc<CsvImporter>,
        aggregator: Arc<Aggregator>,
        cache: Arc<StatsCache>,
    ) -> Self {
        Self {
            config,
            lock,
            importer,
            aggregator,
            cache,
            status: RwLock::new(ServiceStatus::Stopped),
            stats: ImportServiceStats::default(),
        }
    }

    /// Run counters for inspection.
    pub fn stats(&self) -> &ImportServiceStats {
        &self.stats
    }

    /// Execute one scheduled tick.
    ///
    /// Returns `Ok(None)` when the lock was held elsewhere and the tick
    /// was skipped, `Ok(Some(summary))` when this instance ran the
    /// import.
    pub async fn run_once(&self) -> Result<Option<ImportSummary>, Error> {
        let lease = self
            .lock
            .try_acquire(
                &self.config.lock_name,
                self.config.lock_at_most_for,
                self.config.lock_at_least_for,
            )
            .await?;
        let lease = match lease {
            Some(lease) => lease,
            None => {
                metrics::record_lock_attempt(false);
                metrics::record_import_run("skipped");
                self.stats.runs_skipped.fetch_add(1, Ordering::Relaxed);
                debug!(lock = %self.config.lock_name, "scheduled run skipped, lock held elsewhere");
                return Ok(None);
            }
        };
        metrics::record_lock_attempt(true);

        let outcome = self.run_locked().await;

        // Release even when the run failed; the minimum hold still
        // applies either way.
        if let Err(e) = self.lock.release(lease).await {
            warn!(lock = %self.config.lock_name, error = %e, "failed to release scheduler lock");
        }

        match outcome {
            Ok(summary) => {
                metrics::record_import_run("executed");
                self.stats.runs_executed.fetch_add(1, Ordering::Relaxed);
                Ok(Some(summary))
            }
            Err(e) => {
                metrics::record_import_run("failed");
                metrics::record_error(e.kind());
                self.stats.runs_failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// The work performed while holding the lock.
    async fn run_locked(&self) -> Result<ImportSummary, Error> {
        let summary = self.importer.import_all().await?;

        // History may have changed for any symbol.
        self.cache.invalidate_all();

        let report = self.aggregator.aggregate_all(TimeRange::full()).await?;
        if !report.failures.is_empty() {
            warn!(
                failed = report.failures.len(),
                "some symbols failed to aggregate after import"
            );
        }

        info!(
            files = summary.files,
            inserted = summary.inserted,
            skipped = summary.skipped,
            aggregated = report.succeeded,
            "scheduled run complete"
        );
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl Service for ImportService {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        info!(
            interval_secs = self.config.run_interval.as_secs(),
            lock = %self.config.lock_name,
            "import service started"
        );

        let mut ticker = interval(self.config.run_interval);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            debug!("import service received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(missed = n, "import service broadcast receiver lagged");
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "scheduled import run failed");
                    }
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        info!("import service stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "importer"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StatsCacheConfig;
    use crate::ingestion::ImportConfig;
    use crate::lock::MemoryLockProvider;
    use crate::storage::{MemoryPriceStore, PriceStore, StatsRepository};
    use crate::types::StatsKey;
    use std::path::Path;

    fn write_fixture(dir: &Path) {
        std::fs::write(
            dir.join("BTC_values.csv"),
            "timestamp,symbol,price\n\
             1000,BTC,30000\n\
             2000,BTC,50000\n",
        )
        .unwrap();
    }

    fn build_service(
        dir: &Path,
        lock: Arc<dyn LockProvider>,
    ) -> (ImportService, Arc<StatsRepository>, Arc<StatsCache>) {
        let prices: Arc<dyn PriceStore> = Arc::new(MemoryPriceStore::new());
        let repo = Arc::new(StatsRepository::new());
        let cache = Arc::new(StatsCache::new(StatsCacheConfig::default()));

        let importer = Arc::new(CsvImporter::new(
            prices.clone(),
            ImportConfig {
                directory: dir.to_path_buf(),
                batch_size: 100,
            },
        ));
        let aggregator = Arc::new(Aggregator::new(prices, repo.clone(), cache.clone()));

        let service = ImportService::new(
            ImportServiceConfig::default(),
            lock,
            importer,
            aggregator,
            cache.clone(),
        );
        (service, repo, cache)
    }

    #[tokio::test]
    async fn test_run_once_imports_and_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let (service, repo, cache) = build_service(dir.path(), Arc::new(MemoryLockProvider::new()));
        let summary = service.run_once().await.unwrap().unwrap();
        assert_eq!(summary.inserted, 2);

        let key = StatsKey::full_period("BTC");
        assert!(repo.get(&key).is_some());
        assert!(cache.get(&key).is_some());
        assert_eq!(service.stats().runs_executed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_run_skipped_when_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let lock = Arc::new(MemoryLockProvider::new());
        let holder = lock
            .try_acquire("importLock", Duration::from_secs(600), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        let (service, repo, _) = build_service(dir.path(), lock.clone());
        let outcome = service.run_once().await.unwrap();
        assert!(outcome.is_none());
        assert!(repo.is_empty());
        assert_eq!(service.stats().runs_skipped.load(Ordering::Relaxed), 1);

        lock.release(holder).await.unwrap();
        assert!(service.run_once().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_run_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        // Directory exists but holds no CSV files, so the run fails.

        let lock = Arc::new(MemoryLockProvider::new());
        let (mut service, _, _) = build_service(dir.path(), lock.clone());
        service.config.lock_at_least_for = Duration::ZERO;

        let errors_before = metrics::ERRORS_TOTAL.with_label_values(&["import"]).get();
        assert!(service.run_once().await.is_err());
        assert_eq!(service.stats().runs_failed.load(Ordering::Relaxed), 1);
        assert!(metrics::ERRORS_TOTAL.with_label_values(&["import"]).get() > errors_before);

        // With no minimum hold the lock is free again immediately.
        let retry = lock
            .try_acquire("importLock", Duration::from_secs(600), Duration::ZERO)
            .await
            .unwrap();
        assert!(retry.is_some());
    }
}
