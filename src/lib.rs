//! Crypto price recommendation service
//!
//! This library provides the building blocks of a clustered price analytics
//! service:
//! - Scheduled CSV ingestion guarded by a distributed, time-boxed lock
//! - Per-symbol aggregation (open/close, min/max, average, normalized range)
//! - Read-through stats cache with TTL, LRU eviction and single-flight misses
//! - Per-client token-bucket rate limiting on the read path

#![warn(clippy::all)]

pub mod aggregation;
pub mod app;
pub mod cache;
pub mod error;
pub mod ingestion;
pub mod lock;
pub mod ratelimit;
pub mod services;
pub mod storage;
pub mod symbols;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

// Re-export main types
pub use app::RecommendationService;
pub use error::{Error, Result};
pub use types::{CryptoStats, PricePoint, StatsKey, TimeRange};
