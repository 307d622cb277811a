//! Per-client token bucket rate limiting
//!
//! Each client key (normally the caller's IP) gets its own bucket holding
//! up to `capacity` tokens. A request consumes one token; an empty bucket
//! rejects the request without queueing. Tokens refill greedily:
//! `refill_tokens` per `refill_period`, credited in whole tokens as soon
//! as enough of the period has elapsed rather than all at once at the
//! period boundary.
//!
//! Buckets are created lazily on first use and dropped again after
//! `bucket_ttl` without access, so the map only holds recently active
//! clients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch; disabled means every request is admitted
    pub enabled: bool,

    /// Maximum tokens a bucket can hold (burst size)
    pub capacity: u64,

    /// Tokens credited per refill period
    pub refill_tokens: u64,

    /// Length of the refill period
    pub refill_period: Duration,

    /// Idle time after which a bucket is discarded
    pub bucket_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10,
            refill_tokens: 10,
            refill_period: Duration::from_secs(60),
            bucket_ttl: Duration::from_secs(3600),
        }
    }
}

struct TokenBucket {
    tokens: AtomicU64,
    /// Guards refill bookkeeping; consume itself is lock-free.
    refill_state: Mutex<RefillState>,
}

struct RefillState {
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    fn new(capacity: u64) -> Self {
        let now = Instant::now();
        Self {
            tokens: AtomicU64::new(capacity),
            refill_state: Mutex::new(RefillState {
                last_refill: now,
                last_access: now,
            }),
        }
    }

    /// Credit any tokens earned since the last refill.
    fn refill(&self, config: &RateLimitConfig) {
        let mut state = self.refill_state.lock();
        state.last_access = Instant::now();

        let elapsed = state.last_refill.elapsed();
        let period_ms = config.refill_period.as_millis().max(1) as u64;
        let earned = (elapsed.as_millis() as u64).saturating_mul(config.refill_tokens) / period_ms;
        if earned == 0 {
            return;
        }

        // Advance last_refill only by the time the credited tokens account
        // for, so fractional progress toward the next token is kept.
        let consumed_ms = earned.saturating_mul(period_ms) / config.refill_tokens.max(1);
        state.last_refill += Duration::from_millis(consumed_ms);

        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            let next = (current + earned).min(config.capacity);
            match self.tokens.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Take one token if available.
    fn try_consume(&self) -> bool {
        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn idle_for(&self) -> Duration {
        self.refill_state.lock().last_access.elapsed()
    }
}

/// Rate limiter keeping one token bucket per client key.
pub struct KeyedRateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Arc<TokenBucket>>,
    total_rejections: AtomicU64,
}

impl KeyedRateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            total_rejections: AtomicU64::new(0),
        }
    }

    /// Create a limiter and spawn a background task that evicts idle
    /// buckets every `sweep_interval`.
    pub fn new_with_cleanup(config: RateLimitConfig, sweep_interval: Duration) -> Arc<Self> {
        let limiter = Arc::new(Self::new(config));
        let weak = Arc::downgrade(&limiter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(limiter) => limiter.cleanup(),
                    None => break,
                }
            }
        });
        limiter
    }

    /// Admit or reject one request for `key`.
    pub fn try_acquire(&self, key: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.config.capacity)))
            .clone();

        bucket.refill(&self.config);
        let admitted = bucket.try_consume();
        if !admitted {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(client = key, "request rejected by rate limiter");
        }
        admitted
    }

    /// Tokens currently available for `key`, after refill. A key with no
    /// bucket yet reports full capacity.
    pub fn remaining(&self, key: &str) -> u64 {
        match self.buckets.get(key) {
            Some(bucket) => {
                bucket.refill(&self.config);
                bucket.tokens.load(Ordering::Acquire)
            }
            None => self.config.capacity,
        }
    }

    /// Total requests rejected since construction.
    pub fn rejection_count(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets idle longer than the configured TTL.
    pub fn cleanup(&self) {
        let ttl = self.config.bucket_ttl;
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for() < ttl);
        let evicted = before - self.buckets.len();
        if evicted > 0 {
            info!(evicted, remaining = self.buckets.len(), "evicted idle rate limit buckets");
        }
    }
}
