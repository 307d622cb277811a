//! Core data types used throughout the service
//!
//! # Key Types
//!
//! - **`PricePoint`**: a single market observation (timestamp + symbol + price)
//! - **`CryptoStats`**: computed aggregate for a symbol over a period
//! - **`TimeRange`**: time window for aggregation and queries (start, end)
//! - **`StatsKey`**: cache/repository key `(symbol, period)`
//!
//! All monetary values use [`rust_decimal::Decimal`] to avoid the precision
//! loss of binary floating point; market data mixes very large and very small
//! magnitudes and rounding errors would compound in ratios like the
//! normalized range, changing orderings downstream.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// A single market observation point.
///
/// Timestamps are Unix milliseconds in UTC. Points are immutable once
/// recorded; storage drops duplicate `(symbol, timestamp)` pairs.
///
/// # Example
///
/// ```rust
/// use recommendations::types::PricePoint;
/// use rust_decimal::Decimal;
///
/// let price: Decimal = "46813.21".parse().unwrap();
/// let point = PricePoint::new(1641009600000, "BTC", price).unwrap();
/// assert_eq!(point.symbol, "BTC");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Unix timestamp in milliseconds since epoch (UTC)
    pub timestamp: i64,

    /// Coin ticker, never blank
    pub symbol: String,

    /// Strictly positive quote value
    pub price: Decimal,
}

impl PricePoint {
    /// Create a validated price point.
    ///
    /// Rejects blank symbols and non-positive prices.
    pub fn new(timestamp: i64, symbol: impl Into<String>, price: Decimal) -> Result<Self, Error> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(Error::InvalidData("symbol cannot be empty".to_string()));
        }
        if price <= Decimal::ZERO {
            return Err(Error::InvalidData(format!(
                "price must be positive, got {}",
                price
            )));
        }
        Ok(Self {
            timestamp,
            symbol,
            price,
        })
    }
}

/// Time range for aggregation and queries (inclusive on both ends).
///
/// # Example
///
/// ```rust
/// use recommendations::types::TimeRange;
///
/// let range = TimeRange::new(1000, 2000).unwrap();
/// assert!(range.contains(1000));
/// assert!(range.contains(2000));
/// assert!(!range.contains(2001));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, validating that start <= end.
    pub fn new(start: i64, end: i64) -> Result<Self, Error> {
        if start > end {
            return Err(Error::InvalidData(format!(
                "invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// The full-history period, used as the default aggregation window.
    pub fn full() -> Self {
        Self {
            start: 0,
            end: i64::MAX,
        }
    }

    /// A UTC calendar day as a millisecond window.
    pub fn utc_day(date: chrono::NaiveDate) -> Self {
        let start = date
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp_millis();
        Self {
            start,
            end: start + 86_400_000 - 1,
        }
    }

    /// Check if a timestamp falls within this range (inclusive).
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Whether this is the full-history period.
    pub fn is_full(&self) -> bool {
        *self == Self::full()
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full() {
            write!(f, "full")
        } else {
            write!(f, "[{}, {}]", self.start, self.end)
        }
    }
}

/// Immutable snapshot of computed statistics for a symbol over a period.
///
/// `normalized_range` follows the formula `(max - min) / min` rounded to
/// 4 decimal places half-up at calculation time; it is a unit-less
/// volatility proxy that makes coins with different absolute prices
/// comparable. `avg_price` is rounded to 8 decimal places half-up so that
/// recomputation over the same points is reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoStats {
    /// Coin ticker
    pub symbol: String,

    /// Aggregation window this snapshot covers
    pub period: TimeRange,

    /// Price of the earliest point in the period (open)
    pub oldest_price: Decimal,

    /// Price of the latest point in the period (close)
    pub newest_price: Decimal,

    /// Minimum price over the period
    pub min_price: Decimal,

    /// Maximum price over the period
    pub max_price: Decimal,

    /// Arithmetic mean price, 8 decimal places
    pub avg_price: Decimal,

    /// `(max - min) / min`, 4 decimal places
    pub normalized_range: Decimal,
}

impl CryptoStats {
    /// Cache/repository key for this snapshot.
    pub fn key(&self) -> StatsKey {
        StatsKey {
            symbol: self.symbol.clone(),
            period: self.period,
        }
    }
}

/// Key identifying one aggregate: a symbol and the period it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatsKey {
    /// Coin ticker
    pub symbol: String,

    /// Aggregation window
    pub period: TimeRange,
}

impl StatsKey {
    /// Key for the full-history aggregate of a symbol.
    pub fn full_period(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            period: TimeRange::full(),
        }
    }
}

impl fmt::Display for StatsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_price_point_validation() {
        assert!(PricePoint::new(1000, "BTC", dec("42.5")).is_ok());
        assert!(PricePoint::new(1000, "  ", dec("42.5")).is_err());
        assert!(PricePoint::new(1000, "BTC", dec("0")).is_err());
        assert!(PricePoint::new(1000, "BTC", dec("-1.2")).is_err());
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(100, 200).unwrap();
        assert!(range.contains(150));
        assert!(!range.contains(50));
        assert!(!range.contains(250));
        assert!(TimeRange::new(200, 100).is_err());
    }

    #[test]
    fn test_utc_day_window() {
        let date = chrono::NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let range = TimeRange::utc_day(date);
        assert_eq!(range.start, 1640995200000);
        assert_eq!(range.end, 1640995200000 + 86_400_000 - 1);
        // Midnight of the next day is excluded
        assert!(!range.contains(1640995200000 + 86_400_000));
    }

    #[test]
    fn test_stats_key_display() {
        let key = StatsKey::full_period("BTC");
        assert_eq!(key.to_string(), "BTC/full");

        let day = StatsKey {
            symbol: "ETH".to_string(),
            period: TimeRange::new(0, 10).unwrap(),
        };
        assert_eq!(day.to_string(), "ETH/[0, 10]");
    }
}
