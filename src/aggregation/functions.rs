//! Statistical functions over price series
//!
//! All arithmetic uses [`Decimal`] with fixed scales and half-up rounding so
//! that recomputation over the same points always yields the same aggregate:
//! averages are rounded to 8 decimal places, the normalized range to 4.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::Error;
use crate::types::{CryptoStats, PricePoint, TimeRange};

/// Scale of the average price.
pub const AVG_SCALE: u32 = 8;

/// Scale of the normalized range.
pub const RANGE_SCALE: u32 = 4;

/// Calculates summary statistics for a symbol over the provided points.
///
/// The normalized range is defined as `(max - min) / min` and serves as a
/// unit-less volatility proxy for ranking coins with different absolute
/// prices. The oldest and newest points act as the open and close of the
/// period.
///
/// # Errors
///
/// Returns [`Error::InvalidData`] when the point list is empty or contains
/// points of another symbol.
pub fn calculate_stats(
    symbol: &str,
    points: &[PricePoint],
    period: TimeRange,
) -> Result<CryptoStats, Error> {
    if points.is_empty() {
        return Err(Error::InvalidData(
            "price points list cannot be empty".to_string(),
        ));
    }

    for point in points {
        if point.symbol != symbol {
            return Err(Error::InvalidData(format!(
                "price point symbol mismatch: expected {} but found {}",
                symbol, point.symbol
            )));
        }
    }

    // min/max by timestamp give open/close; unwraps are safe, the slice is
    // non-empty.
    let oldest = points.iter().min_by_key(|p| p.timestamp).unwrap();
    let newest = points.iter().max_by_key(|p| p.timestamp).unwrap();

    let min_price = points.iter().map(|p| p.price).min().unwrap();
    let max_price = points.iter().map(|p| p.price).max().unwrap();

    if min_price <= Decimal::ZERO {
        return Err(Error::InvalidData(format!(
            "non-positive price in series for {}",
            symbol
        )));
    }

    let sum: Decimal = points.iter().map(|p| p.price).sum();
    let avg_price = (sum / Decimal::from(points.len()))
        .round_dp_with_strategy(AVG_SCALE, RoundingStrategy::MidpointAwayFromZero);

    let normalized_range = ((max_price - min_price) / min_price)
        .round_dp_with_strategy(RANGE_SCALE, RoundingStrategy::MidpointAwayFromZero);

    Ok(CryptoStats {
        symbol: symbol.to_string(),
        period,
        oldest_price: oldest.price,
        newest_price: newest.price,
        min_price,
        max_price,
        avg_price,
        normalized_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn point(ts: i64, symbol: &str, price: &str) -> PricePoint {
        PricePoint::new(ts, symbol, dec(price)).unwrap()
    }

    #[test]
    fn test_calculate_stats_basic() {
        let points = vec![
            point(3000, "BTC", "45000.00"),
            point(1000, "BTC", "35000.00"),
            point(2000, "BTC", "30000.00"),
            point(2500, "BTC", "50000.00"),
        ];

        let stats = calculate_stats("BTC", &points, TimeRange::full()).unwrap();
        assert_eq!(stats.oldest_price, dec("35000.00"));
        assert_eq!(stats.newest_price, dec("45000.00"));
        assert_eq!(stats.min_price, dec("30000.00"));
        assert_eq!(stats.max_price, dec("50000.00"));
        // (50000 - 30000) / 30000 = 0.6667 at scale 4, half-up
        assert_eq!(stats.normalized_range, dec("0.6667"));
        assert_eq!(stats.avg_price, dec("40000.00000000"));
    }

    #[test]
    fn test_average_rounds_half_up_at_scale_8() {
        // (0.1 + 0.2 + 0.2) / 3 = 0.1666...65 -> 0.16666667
        let points = vec![
            point(1, "ETH", "0.1"),
            point(2, "ETH", "0.2"),
            point(3, "ETH", "0.2"),
        ];
        let stats = calculate_stats("ETH", &points, TimeRange::full()).unwrap();
        assert_eq!(stats.avg_price, dec("0.16666667"));
    }

    #[test]
    fn test_empty_points_rejected() {
        let err = calculate_stats("BTC", &[], TimeRange::full()).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_symbol_mismatch_rejected() {
        let points = vec![point(1, "BTC", "100"), point(2, "ETH", "200")];
        let err = calculate_stats("BTC", &points, TimeRange::full()).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_idempotent_over_fixed_input() {
        let points = vec![
            point(10, "XRP", "0.55"),
            point(20, "XRP", "0.60"),
            point(30, "XRP", "0.48"),
        ];
        let a = calculate_stats("XRP", &points, TimeRange::full()).unwrap();
        let b = calculate_stats("XRP", &points, TimeRange::full()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_point_series() {
        let points = vec![point(10, "LTC", "73.21")];
        let stats = calculate_stats("LTC", &points, TimeRange::full()).unwrap();
        assert_eq!(stats.oldest_price, stats.newest_price);
        assert_eq!(stats.min_price, stats.max_price);
        assert_eq!(stats.normalized_range, Decimal::ZERO);
    }
}
