//! CSV price data ingestion
//!
//! Reads `*.csv` files from a configured directory and loads them into a
//! [`PriceStore`]. Files carry a `timestamp,symbol,price` header row;
//! timestamps are unix milliseconds. Damaged rows are logged and skipped
//! so one bad line never fails a whole file, and duplicate points are
//! absorbed by the store's do-nothing upsert, making re-imports safe.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ImportError;
use crate::metrics;
use crate::storage::PriceStore;
use crate::types::PricePoint;

/// Importer configuration
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Directory scanned for `*.csv` files
    pub directory: PathBuf,

    /// Points per storage insert batch
    pub batch_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./prices"),
            batch_size: 1000,
        }
    }
}

/// Outcome of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// CSV files processed
    pub files: usize,

    /// Data rows seen across all files
    pub total_rows: usize,

    /// Points newly stored
    pub inserted: usize,

    /// Rows dropped: parse failures, validation failures, duplicates
    pub skipped: usize,
}

/// Row shape expected in the data files.
#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: i64,
    symbol: String,
    price: Decimal,
}

/// Loads CSV price files into a store.
pub struct CsvImporter {
    store: Arc<dyn PriceStore>,
    config: ImportConfig,
}

impl CsvImporter {
    /// Create an importer over the given store.
    pub fn new(store: Arc<dyn PriceStore>, config: ImportConfig) -> Self {
        Self { store, config }
    }

    /// Check that the import directory exists, is a directory, is
    /// readable, and holds at least one CSV file.
    pub fn validate_directory(&self) -> Result<(), ImportError> {
        let dir = &self.config.directory;
        if !dir.exists() {
            return Err(ImportError::DirectoryMissing(dir.clone()));
        }
        if !dir.is_dir() {
            return Err(ImportError::NotADirectory(dir.clone()));
        }
        let entries = std::fs::read_dir(dir).map_err(|_| ImportError::Unreadable(dir.clone()))?;
        let has_csv = entries
            .flatten()
            .any(|entry| is_csv(&entry.path()) && entry.path().is_file());
        if !has_csv {
            return Err(ImportError::NoCsvFiles(dir.clone()));
        }
        Ok(())
    }

    /// Import every CSV file in the directory.
    ///
    /// Files are imported concurrently, each parsed off the async
    /// runtime, with inserts batched at `batch_size`. Fails fast on
    /// directory problems but tolerates damaged rows inside files.
    pub async fn import_all(&self) -> Result<ImportSummary, ImportError> {
        self.validate_directory()?;
        let started = Instant::now();

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.config.directory)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_csv(path) && path.is_file())
            .collect();
        files.sort();

        let mut tasks = tokio::task::JoinSet::new();
        for path in files {
            let store = self.store.clone();
            let batch_size = self.config.batch_size;
            tasks.spawn(async move { import_one(store, batch_size, path).await });
        }

        let mut summary = ImportSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let file_summary = joined.map_err(|e| ImportError::TaskFailed(e.to_string()))??;
            summary.files += 1;
            summary.total_rows += file_summary.total_rows;
            summary.inserted += file_summary.inserted;
            summary.skipped += file_summary.skipped;
        }

        metrics::record_import_rows(summary.inserted, summary.skipped);
        metrics::IMPORT_DURATION.observe(started.elapsed().as_secs_f64());
        info!(
            files = summary.files,
            rows = summary.total_rows,
            inserted = summary.inserted,
            skipped = summary.skipped,
            "import run complete"
        );
        Ok(summary)
    }

    /// Import a single CSV file.
    pub async fn import_file(&self, path: &Path) -> Result<ImportSummary, ImportError> {
        import_one(self.store.clone(), self.config.batch_size, path.to_path_buf()).await
    }
}

async fn import_one(
    store: Arc<dyn PriceStore>,
    batch_size: usize,
    path: PathBuf,
) -> Result<ImportSummary, ImportError> {
    let parse_path = path.clone();
    let (points, total_rows, damaged) =
        tokio::task::spawn_blocking(move || parse_file(&parse_path))
            .await
            .map_err(|e| ImportError::TaskFailed(e.to_string()))??;

    let mut inserted = 0;
    for batch in points.chunks(batch_size) {
        inserted += store.insert_batch(batch.to_vec()).await?;
    }

    let parsed = total_rows - damaged;
    let duplicates = parsed - inserted;
    debug!(
        file = %path.display(),
        rows = total_rows,
        inserted,
        damaged,
        duplicates,
        "imported file"
    );
    Ok(ImportSummary {
        files: 1,
        total_rows,
        inserted,
        skipped: damaged + duplicates,
    })
}

/// Parse one file, returning the valid points, total data rows, and how
/// many rows were damaged.
fn parse_file(path: &Path) -> Result<(Vec<PricePoint>, usize, usize), ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut points = Vec::new();
    let mut total_rows = 0;
    let mut damaged = 0;

    for result in reader.deserialize::<CsvRow>() {
        total_rows += 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!(file = %path.display(), row = total_rows, error = %e, "skipping damaged row");
                damaged += 1;
                continue;
            }
        };
        match PricePoint::new(row.timestamp, row.symbol, row.price) {
            Ok(point) => points.push(point),
            Err(e) => {
                warn!(file = %path.display(), row = total_rows, error = %e, "skipping invalid row");
                damaged += 1;
            }
        }
    }

    Ok((points, total_rows, damaged))
}

fn is_csv(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("csv")
}
