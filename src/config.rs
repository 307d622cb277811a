//! Configuration management
//!
//! TOML configuration with environment variable overrides (`RECS_`
//! prefix) and sensible defaults. Sections map one-to-one onto the
//! runtime components: importer, scheduler lock, aggregate cache, rate
//! limiter, monitoring.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::StatsCacheConfig;
use crate::ingestion::ImportConfig;
use crate::ratelimit::RateLimitConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Import configuration
    #[serde(default)]
    pub import: ImportSection,

    /// Scheduler and lock configuration
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Aggregate cache configuration
    #[serde(default)]
    pub cache: CacheSection,

    /// Rate limiter configuration
    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

/// Import configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportSection {
    /// Directory scanned for CSV price files
    #[serde(default = "default_import_directory")]
    pub directory: PathBuf,

    /// Points per storage insert batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerSection {
    /// Seconds between scheduled import runs
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Name of the scheduler lock
    #[serde(default = "default_lock_name")]
    pub lock_name: String,

    /// Upper bound on lock validity if the holder dies
    #[serde(default = "default_lock_at_most_for_secs")]
    pub lock_at_most_for_secs: u64,

    /// Minimum hold time, absorbs clock skew between instances
    #[serde(default = "default_lock_at_least_for_secs")]
    pub lock_at_least_for_secs: u64,

    /// Lock provider: "memory" or "file"
    #[serde(default = "default_lock_provider")]
    pub lock_provider: String,

    /// Directory for lock record files (file provider only)
    #[serde(default = "default_lock_directory")]
    pub lock_directory: PathBuf,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSection {
    /// Enable the aggregate cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum cached aggregates
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entry time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitSection {
    /// Enable per-client rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bucket capacity (burst size)
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Tokens credited per refill period
    #[serde(default = "default_refill_tokens")]
    pub refill_tokens: u64,

    /// Refill period in seconds
    #[serde(default = "default_refill_period_secs")]
    pub refill_period_secs: u64,

    /// Idle seconds before a bucket is discarded
    #[serde(default = "default_bucket_ttl_secs")]
    pub bucket_ttl_secs: u64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringSection {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable structured logging
    #[serde(default = "default_true")]
    pub structured_logging: bool,
}

// Default value functions
fn default_import_directory() -> PathBuf {
    PathBuf::from("./prices")
}
fn default_batch_size() -> usize {
    1000
}
fn default_interval_secs() -> u64 {
    60
}
fn default_lock_name() -> String {
    "importLock".to_string()
}
fn default_lock_at_most_for_secs() -> u64 {
    600
}
fn default_lock_at_least_for_secs() -> u64 {
    10
}
fn default_lock_provider() -> String {
    "memory".to_string()
}
fn default_lock_directory() -> PathBuf {
    PathBuf::from("./locks")
}
fn default_max_entries() -> usize {
    1024
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_capacity() -> u64 {
    10
}
fn default_refill_tokens() -> u64 {
    10
}
fn default_refill_period_secs() -> u64 {
    60
}
fn default_bucket_ttl_secs() -> u64 {
    3600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ImportSection {
    fn default() -> Self {
        Self {
            directory: default_import_directory(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            lock_name: default_lock_name(),
            lock_at_most_for_secs: default_lock_at_most_for_secs(),
            lock_at_least_for_secs: default_lock_at_least_for_secs(),
            lock_provider: default_lock_provider(),
            lock_directory: default_lock_directory(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            refill_tokens: default_refill_tokens(),
            refill_period_secs: default_refill_period_secs(),
            bucket_ttl_secs: default_bucket_ttl_secs(),
        }
    }
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: true,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Import
        if let Ok(dir) = std::env::var("RECS_IMPORT_DIR") {
            self.import.directory = PathBuf::from(dir);
        }
        if let Ok(batch) = std::env::var("RECS_BATCH_SIZE") {
            if let Ok(b) = batch.parse() {
                self.import.batch_size = b;
            }
        }

        // Scheduler
        if let Ok(interval) = std::env::var("RECS_IMPORT_INTERVAL_SECS") {
            if let Ok(i) = interval.parse() {
                self.scheduler.interval_secs = i;
            }
        }
        if let Ok(provider) = std::env::var("RECS_LOCK_PROVIDER") {
            self.scheduler.lock_provider = provider;
        }
        if let Ok(dir) = std::env::var("RECS_LOCK_DIR") {
            self.scheduler.lock_directory = PathBuf::from(dir);
        }

        // Rate limiting
        if let Ok(capacity) = std::env::var("RECS_RATE_LIMIT_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                self.rate_limit.capacity = c;
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.import.directory.as_os_str().is_empty() {
            return Err("Import directory cannot be empty".to_string());
        }
        if self.import.batch_size == 0 {
            return Err("Batch size must be > 0".to_string());
        }

        if self.scheduler.interval_secs == 0 {
            return Err("Scheduler interval must be > 0".to_string());
        }
        if self.scheduler.lock_name.trim().is_empty() {
            return Err("Lock name cannot be empty".to_string());
        }
        if self.scheduler.lock_at_most_for_secs <= self.scheduler.lock_at_least_for_secs {
            return Err("lock_at_most_for must exceed lock_at_least_for".to_string());
        }
        match self.scheduler.lock_provider.as_str() {
            "memory" | "file" => {}
            other => return Err(format!("Unknown lock provider: {}", other)),
        }

        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err("Cache max entries must be > 0 when enabled".to_string());
        }

        if self.rate_limit.enabled {
            if self.rate_limit.capacity == 0 {
                return Err("Rate limit capacity must be > 0 when enabled".to_string());
            }
            if self.rate_limit.refill_tokens == 0 || self.rate_limit.refill_period_secs == 0 {
                return Err("Rate limit refill must be > 0 when enabled".to_string());
            }
        }

        Ok(())
    }

    /// Importer view of this configuration.
    pub fn import_config(&self) -> ImportConfig {
        ImportConfig {
            directory: self.import.directory.clone(),
            batch_size: self.import.batch_size,
        }
    }

    /// Cache view of this configuration.
    pub fn cache_config(&self) -> StatsCacheConfig {
        StatsCacheConfig {
            enabled: self.cache.enabled,
            max_entries: self.cache.max_entries,
            ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }

    /// Rate limiter view of this configuration.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.rate_limit.enabled,
            capacity: self.rate_limit.capacity,
            refill_tokens: self.rate_limit.refill_tokens,
            refill_period: Duration::from_secs(self.rate_limit.refill_period_secs),
            bucket_ttl: Duration::from_secs(self.rate_limit.bucket_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.lock_name, "importLock");
        assert_eq!(config.rate_limit.capacity, 10);
        assert!(config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scheduler]
            interval_secs = 3600

            [rate_limit]
            capacity = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.interval_secs, 3600);
        assert_eq!(config.scheduler.lock_at_most_for_secs, 600);
        assert_eq!(config.rate_limit.capacity, 25);
        assert_eq!(config.rate_limit.refill_tokens, 10);
    }

    #[test]
    fn test_validation_rejects_inverted_lock_bounds() {
        let mut config = Config::default();
        config.scheduler.lock_at_least_for_secs = 700;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_lock_provider() {
        let mut config = Config::default();
        config.scheduler.lock_provider = "zookeeper".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("RECS_RATE_LIMIT_CAPACITY", "42");
        let config = Config::from_env();
        assert_eq!(config.rate_limit.capacity, 42);
        std::env::remove_var("RECS_RATE_LIMIT_CAPACITY");
    }
}
