//! Price and aggregate storage
//!
//! Defines the [`PriceStore`] seam so the pipeline can run against different
//! backends, plus the in-memory implementations used by the daemon and tests.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{PricePoint, TimeRange};

pub mod memory;

pub use memory::{MemoryPriceStore, StatsRepository};

/// Core trait for price point storage backends.
///
/// Implementations must be safe for concurrent access from multiple tasks.
/// Insertion follows do-nothing upsert semantics: a point whose
/// `(symbol, timestamp)` pair already exists is dropped, not overwritten,
/// so re-importing the same data never changes stored history.
#[async_trait]
pub trait PriceStore: Send + Sync + 'static {
    /// Insert a batch of points, returning how many were newly stored.
    ///
    /// Duplicates within the batch or against existing data are skipped
    /// silently and excluded from the returned count.
    async fn insert_batch(&self, points: Vec<PricePoint>) -> Result<usize, StorageError>;

    /// All points for a symbol, ordered by ascending timestamp.
    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<PricePoint>, StorageError>;

    /// Points for a symbol within a time range, ordered by ascending timestamp.
    async fn find_by_symbol_in_range(
        &self,
        symbol: &str,
        range: TimeRange,
    ) -> Result<Vec<PricePoint>, StorageError>;

    /// Points for all symbols within a time range.
    async fn find_in_range(&self, range: TimeRange) -> Result<Vec<PricePoint>, StorageError>;

    /// Distinct symbols present in storage, sorted.
    async fn symbols(&self) -> Result<Vec<String>, StorageError>;

    /// Total number of stored points.
    async fn len(&self) -> Result<usize, StorageError>;

    /// Whether storage holds no points.
    async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }
}
