//! Scheduler lock coordination
//!
//! Multiple service instances may share the same import directory and run
//! the same schedule. A [`LockProvider`] ensures at most one instance
//! executes a scheduled run at a time: the winner acquires a named lease,
//! everyone else observes the lock as held and skips the tick.
//!
//! A lease carries two bounds. `lock_at_most_for` caps how long the record
//! stays valid if the holder dies mid-run, after which the lock can be
//! reclaimed. `lock_at_least_for` is a minimum hold: releasing before it
//! elapses keeps the record alive until the minimum passes, which absorbs
//! clock skew between instances and stops a fast run from letting a
//! lagging peer double-fire the same tick.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LockError;

/// Extra slack before an expired file record may be reclaimed, covering
/// clock skew between instances sharing a filesystem.
const RECLAIM_GRACE_MS: i64 = 2_000;

/// Persistent form of a held lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Lock name, e.g. `importLock`
    pub name: String,

    /// Unix ms after which the record is considered expired
    pub locked_until: i64,

    /// Opaque holder token, unique per acquisition
    pub locked_by: String,
}

/// Proof of a successful acquisition, required to release.
#[derive(Debug, Clone)]
pub struct LockLease {
    /// Lock name this lease covers
    pub name: String,

    /// Holder token matching the stored record
    pub token: String,

    /// Acquisition time in unix ms
    pub acquired_at: i64,

    /// Earliest unix ms at which release fully frees the lock
    pub min_until: i64,
}

/// Coordination seam between the scheduler and whatever medium the
/// deployment shares (process memory, a common filesystem).
#[async_trait]
pub trait LockProvider: Send + Sync + 'static {
    /// Try to acquire the named lock.
    ///
    /// Returns `Ok(None)` when another holder currently owns it; that is
    /// the normal skip signal, not an error. On success the lease is valid
    /// for `lock_at_most_for` and must be released with [`release`].
    ///
    /// [`release`]: LockProvider::release
    async fn try_acquire(
        &self,
        name: &str,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> Result<Option<LockLease>, LockError>;

    /// Release a held lease.
    ///
    /// If the minimum hold has not elapsed yet, the lock stays blocked
    /// until it does. Releasing a lease whose token no longer matches the
    /// stored record fails with [`LockError::NotHeld`].
    async fn release(&self, lease: LockLease) -> Result<(), LockError>;
}

fn new_lease(name: &str, now: i64, lock_at_least_for: Duration) -> LockLease {
    LockLease {
        name: name.to_string(),
        token: Uuid::new_v4().to_string(),
        acquired_at: now,
        min_until: now + lock_at_least_for.as_millis() as i64,
    }
}

// ============================================================================
// In-process provider
// ============================================================================

/// Lock provider backed by process memory.
///
/// Linearizable within one process; the right default when a single
/// daemon runs the schedule, and the reference behavior for tests.
#[derive(Default)]
pub struct MemoryLockProvider {
    records: Mutex<HashMap<String, LockRecord>>,
}

impl MemoryLockProvider {
    /// Create a provider with no held locks.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for MemoryLockProvider {
    async fn try_acquire(
        &self,
        name: &str,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        let now = Utc::now().timestamp_millis();
        let mut records = self.records.lock();

        if let Some(existing) = records.get(name) {
            if existing.locked_until > now {
                debug!(lock = name, locked_until = existing.locked_until, "lock held elsewhere");
                return Ok(None);
            }
        }

        let lease = new_lease(name, now, lock_at_least_for);
        records.insert(
            name.to_string(),
            LockRecord {
                name: name.to_string(),
                locked_until: now + lock_at_most_for.as_millis() as i64,
                locked_by: lease.token.clone(),
            },
        );
        Ok(Some(lease))
    }

    async fn release(&self, lease: LockLease) -> Result<(), LockError> {
        let now = Utc::now().timestamp_millis();
        let mut records = self.records.lock();

        let held = records
            .get(&lease.name)
            .map(|record| record.locked_by == lease.token)
            .unwrap_or(false);
        if !held {
            return Err(LockError::NotHeld(lease.name));
        }

        if now < lease.min_until {
            // Minimum hold not elapsed: shrink the record to the minimum
            // instead of removing it.
            if let Some(record) = records.get_mut(&lease.name) {
                record.locked_until = lease.min_until;
            }
        } else {
            records.remove(&lease.name);
        }
        Ok(())
    }
}

// ============================================================================
// File-based provider
// ============================================================================

/// Lock provider backed by JSON record files in a shared directory.
///
/// Acquisition relies on `create_new` for the uncontended path. A record
/// that does not parse may be one another node created via `create_new`
/// and has not finished writing yet, so unparsable records are treated as
/// held until they age past the grace period. Reclaims replace the record
/// with an atomic rename and re-read it afterwards; only the node whose
/// token survived the rename race owns the lock.
pub struct FileLockProvider {
    dir: PathBuf,
    node_id: String,
}

impl FileLockProvider {
    /// Create a provider storing records under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            node_id: Uuid::new_v4().to_string(),
        }
    }

    /// Stable identifier of this provider instance, used in log output.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }

    async fn read_record(&self, name: &str) -> Result<LockRecord, LockError> {
        let raw = tokio::fs::read_to_string(self.record_path(name)).await?;
        serde_json::from_str(&raw).map_err(|e| LockError::Corrupted(e.to_string()))
    }

    async fn write_record(&self, record: &LockRecord) -> Result<(), LockError> {
        let raw = serde_json::to_string(record).map_err(|e| LockError::Corrupted(e.to_string()))?;
        tokio::fs::write(self.record_path(&record.name), raw).await?;
        Ok(())
    }

    /// Milliseconds since the record file was last written. A file whose
    /// mtime reads as being in the future counts as just written.
    async fn record_age_ms(&self, name: &str) -> Result<i64, LockError> {
        let metadata = tokio::fs::metadata(self.record_path(name)).await?;
        let modified = metadata.modified()?;
        Ok(modified
            .elapsed()
            .map(|age| age.as_millis() as i64)
            .unwrap_or(0))
    }

    /// Replace the record by renaming a fully-written temp file over it,
    /// then re-read to see which concurrent reclaimer won the rename race.
    async fn reclaim_record(
        &self,
        record: &LockRecord,
        lease: LockLease,
    ) -> Result<Option<LockLease>, LockError> {
        let raw = serde_json::to_string(record).map_err(|e| LockError::Corrupted(e.to_string()))?;
        let tmp = self
            .dir
            .join(format!("{}.lock.{}.tmp", record.name, lease.token));
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, self.record_path(&record.name)).await?;

        match self.read_record(&record.name).await {
            Ok(stored) if stored.locked_by == record.locked_by => {
                debug!(lock = %record.name, node = %self.node_id, "reclaimed lock record");
                Ok(Some(lease))
            }
            Ok(_) | Err(LockError::Corrupted(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl LockProvider for FileLockProvider {
    async fn try_acquire(
        &self,
        name: &str,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let now = Utc::now().timestamp_millis();
        let lease = new_lease(name, now, lock_at_least_for);
        let record = LockRecord {
            name: name.to_string(),
            locked_until: now + lock_at_most_for.as_millis() as i64,
            locked_by: lease.token.clone(),
        };
        let raw = serde_json::to_string(&record).map_err(|e| LockError::Corrupted(e.to_string()))?;

        let path = self.record_path(name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(raw.as_bytes()).await?;
                file.sync_all().await?;
                debug!(lock = name, node = %self.node_id, "lock acquired");
                Ok(Some(lease))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = match self.read_record(name).await {
                    Ok(existing) => existing,
                    Err(LockError::Corrupted(reason)) => {
                        // Possibly a record another node is still writing
                        // between its create_new and write_all. Treat it as
                        // held until it is demonstrably abandoned.
                        match self.record_age_ms(name).await {
                            Ok(age) if age >= RECLAIM_GRACE_MS => {
                                warn!(lock = name, %reason, "replacing stale corrupted lock record");
                                return self.reclaim_record(&record, lease).await;
                            }
                            Ok(_) => {
                                debug!(lock = name, "unreadable lock record is recent, treating as held");
                                return Ok(None);
                            }
                            // Holder removed the file between the failed
                            // create_new and the stat; retry next tick.
                            Err(LockError::Io(e))
                                if e.kind() == std::io::ErrorKind::NotFound =>
                            {
                                return Ok(None);
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Err(LockError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                        // Released between the failed create_new and the read.
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                };

                if existing.locked_until + RECLAIM_GRACE_MS <= now {
                    warn!(
                        lock = name,
                        expired_holder = %existing.locked_by,
                        "reclaiming expired lock record"
                    );
                    return self.reclaim_record(&record, lease).await;
                }

                debug!(lock = name, locked_until = existing.locked_until, "lock held elsewhere");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self, lease: LockLease) -> Result<(), LockError> {
        let existing = match self.read_record(&lease.name).await {
            Ok(existing) => existing,
            Err(LockError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LockError::NotHeld(lease.name));
            }
            Err(e) => return Err(e),
        };

        if existing.locked_by != lease.token {
            return Err(LockError::NotHeld(lease.name));
        }

        let now = Utc::now().timestamp_millis();
        if now < lease.min_until {
            let record = LockRecord {
                locked_until: lease.min_until,
                ..existing
            };
            self.write_record(&record).await?;
        } else {
            tokio::fs::remove_file(self.record_path(&lease.name)).await?;
        }
        debug!(lock = %lease.name, node = %self.node_id, "lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AT_MOST: Duration = Duration::from_secs(600);
    const NO_MIN: Duration = Duration::from_secs(0);

    #[tokio::test]
    async fn test_memory_mutual_exclusion() {
        let provider = MemoryLockProvider::new();

        let first = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(second.is_none());

        provider.release(first.unwrap()).await.unwrap();
        let third = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_memory_min_hold_blocks_reacquire() {
        let provider = MemoryLockProvider::new();
        let lease = provider
            .try_acquire("importLock", AT_MOST, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        // Released well before the minimum hold elapses.
        provider.release(lease).await.unwrap();

        let retry = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(retry.is_none());
    }

    #[tokio::test]
    async fn test_memory_expired_lock_reclaimed() {
        let provider = MemoryLockProvider::new();
        let lease = provider
            .try_acquire("importLock", Duration::from_millis(0), NO_MIN)
            .await
            .unwrap();
        assert!(lease.is_some());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let retry = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(retry.is_some());
    }

    #[tokio::test]
    async fn test_memory_release_with_stale_token_fails() {
        let provider = MemoryLockProvider::new();
        let lease = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap()
            .unwrap();

        let stale = LockLease {
            token: "not-the-holder".to_string(),
            ..lease.clone()
        };
        assert!(matches!(
            provider.release(stale).await,
            Err(LockError::NotHeld(_))
        ));

        provider.release(lease).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_provider_mutual_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileLockProvider::new(dir.path());
        let b = FileLockProvider::new(dir.path());

        let lease = a
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(lease.is_some());

        let contended = b
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(contended.is_none());

        a.release(lease.unwrap()).await.unwrap();
        let after = b
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(after.is_some());
    }

    /// Push a file's mtime far enough into the past that the reclaim
    /// grace period has elapsed.
    fn backdate(path: &std::path::Path) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - Duration::from_secs(30))
            .unwrap();
    }

    #[tokio::test]
    async fn test_file_provider_fresh_unreadable_record_counts_as_held() {
        // An empty record file is what a peer's acquisition looks like
        // between create_new and write_all. It must not be stolen.
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("importLock.lock"), b"").await.unwrap();

        let provider = FileLockProvider::new(dir.path());
        let lease = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(lease.is_none());

        let garbage_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(garbage_dir.path().join("importLock.lock"), b"not json")
            .await
            .unwrap();
        let provider = FileLockProvider::new(garbage_dir.path());
        let lease = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(lease.is_none());
    }

    #[tokio::test]
    async fn test_file_provider_replaces_stale_corrupted_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("importLock.lock");
        tokio::fs::write(&path, b"not json").await.unwrap();
        backdate(&path);

        let provider = FileLockProvider::new(dir.path());
        let lease = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap()
            .unwrap();

        // The replacement record is well-formed and owned by this node.
        let stored = provider.read_record("importLock").await.unwrap();
        assert_eq!(stored.locked_by, lease.token);
        provider.release(lease).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_provider_reclaims_expired_record() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileLockProvider::new(dir.path());

        let dead = LockRecord {
            name: "importLock".to_string(),
            locked_until: Utc::now().timestamp_millis() - RECLAIM_GRACE_MS - 1_000,
            locked_by: "crashed-node".to_string(),
        };
        provider.write_record(&dead).await.unwrap();

        let lease = provider
            .try_acquire("importLock", AT_MOST, NO_MIN)
            .await
            .unwrap();
        assert!(lease.is_some());

        let stored = provider.read_record("importLock").await.unwrap();
        assert_eq!(stored.locked_by, lease.unwrap().token);
    }
}
