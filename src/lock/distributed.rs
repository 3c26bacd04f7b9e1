//! Lease-based mutual exclusion over a [`LockTable`].
//!
//! # Guarantees
//! - At most one non-expired holder per key
//! - Release and renew only succeed for the token that acquired
//! - A crashed holder's lease can be reclaimed once it expires
//!
//! Reclaiming is best-effort, not fencing by itself: every acquisition gets
//! a fencing token that writers embed in what they commit, so a holder whose
//! lease was reclaimed is rejected downstream with a stale-write error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::lock::table::{LockTable, MatchOutcome, PutOutcome};
use crate::observability::metrics;

/// Unique token identifying one acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderToken(String);

impl HolderToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HolderToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock {key} is held by {holder}")]
    Unavailable { key: String, holder: HolderToken },

    #[error("caller does not hold lock {key}")]
    NotHolder { key: String },

    #[error("lease on lock {key} expired")]
    LeaseExpired { key: String },

    #[error("lease duration must be greater than zero")]
    InvalidLease,

    #[error("lock table error: {0}")]
    Table(String),
}

/// A granted lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub holder: HolderToken,
    pub fencing_token: u64,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

/// Distributed lock client.
#[derive(Debug, Clone)]
pub struct DistributedLock {
    table: Arc<dyn LockTable>,
}

impl DistributedLock {
    pub fn new(table: Arc<dyn LockTable>) -> Self {
        Self { table }
    }

    /// Try to take `key` for `lease`. Never blocks.
    pub fn acquire(
        &self,
        key: &str,
        holder: &HolderToken,
        lease: Duration,
    ) -> Result<Lease, LockError> {
        if lease.is_zero() {
            return Err(LockError::InvalidLease);
        }

        match self.table.put_if_free(key, holder, lease, Instant::now())? {
            PutOutcome::Inserted(row) => {
                metrics::record_lock_acquisition("acquired");
                tracing::debug!(key = %key, holder = %holder, fencing_token = row.fencing_token, "Lock acquired");
                Ok(Lease {
                    key: row.key,
                    holder: row.holder,
                    fencing_token: row.fencing_token,
                    acquired_at: row.acquired_at,
                    expires_at: row.expires_at,
                })
            }
            PutOutcome::Conflict(current) => {
                metrics::record_lock_acquisition("unavailable");
                Err(LockError::Unavailable {
                    key: key.to_string(),
                    holder: current.holder,
                })
            }
        }
    }

    /// Release `key` if `holder` still owns it.
    pub fn release(&self, key: &str, holder: &HolderToken) -> Result<(), LockError> {
        match self.table.delete_if_holder(key, holder)? {
            MatchOutcome::Applied(_) => {
                tracing::debug!(key = %key, holder = %holder, "Lock released");
                Ok(())
            }
            MatchOutcome::NotHolder | MatchOutcome::Expired => Err(LockError::NotHolder {
                key: key.to_string(),
            }),
        }
    }

    /// Extend a live lease held by `holder`.
    pub fn renew(
        &self,
        key: &str,
        holder: &HolderToken,
        lease: Duration,
    ) -> Result<Lease, LockError> {
        if lease.is_zero() {
            return Err(LockError::InvalidLease);
        }

        match self.table.extend_if_holder(key, holder, lease, Instant::now())? {
            MatchOutcome::Applied(row) => Ok(Lease {
                key: row.key,
                holder: row.holder,
                fencing_token: row.fencing_token,
                acquired_at: row.acquired_at,
                expires_at: row.expires_at,
            }),
            MatchOutcome::NotHolder => Err(LockError::NotHolder {
                key: key.to_string(),
            }),
            MatchOutcome::Expired => Err(LockError::LeaseExpired {
                key: key.to_string(),
            }),
        }
    }

    /// Current holder of `key`, if the lease is live.
    pub fn is_held(&self, key: &str) -> Result<Option<HolderToken>, LockError> {
        let now = Instant::now();
        Ok(self
            .table
            .get(key)?
            .filter(|row| !row.is_expired(now))
            .map(|row| row.holder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::table::MemoryLockTable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lock() -> DistributedLock {
        DistributedLock::new(Arc::new(MemoryLockTable::new()))
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let lock = lock();
        let winners = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..32 {
                s.spawn(|| {
                    let token = HolderToken::generate();
                    if lock.acquire("fleet/web", &token, Duration::from_secs(30)).is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(lock.is_held("fleet/web").unwrap().is_some());
    }

    #[test]
    fn test_release_requires_matching_token() {
        let lock = lock();
        let owner = HolderToken::generate();
        let intruder = HolderToken::generate();
        lock.acquire("k", &owner, Duration::from_secs(30)).unwrap();

        assert_eq!(
            lock.release("k", &intruder),
            Err(LockError::NotHolder { key: "k".into() })
        );
        assert_eq!(lock.is_held("k").unwrap(), Some(owner.clone()));

        lock.release("k", &owner).unwrap();
        assert_eq!(lock.is_held("k").unwrap(), None);
        // second release is a not-holder
        assert!(lock.release("k", &owner).is_err());
    }

    #[test]
    fn test_zero_lease_rejected() {
        let lock = lock();
        let token = HolderToken::generate();
        assert_eq!(
            lock.acquire("k", &token, Duration::ZERO),
            Err(LockError::InvalidLease)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_holder_lease_reclaimed_after_expiry() {
        let lock = lock();
        let crashed = HolderToken::generate();
        let second = HolderToken::generate();

        let first = lock.acquire("k", &crashed, Duration::from_secs(30)).unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(matches!(
            lock.acquire("k", &second, Duration::from_secs(30)),
            Err(LockError::Unavailable { .. })
        ));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(lock.is_held("k").unwrap(), None);
        let reclaimed = lock.acquire("k", &second, Duration::from_secs(30)).unwrap();
        assert!(reclaimed.fencing_token > first.fencing_token);

        // the crashed holder waking up late can neither release nor renew
        assert!(lock.release("k", &crashed).is_err());
        assert!(lock.renew("k", &crashed, Duration::from_secs(30)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_extends_lease() {
        let lock = lock();
        let holder = HolderToken::generate();
        let other = HolderToken::generate();
        lock.acquire("k", &holder, Duration::from_secs(10)).unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        lock.renew("k", &holder, Duration::from_secs(10)).unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(lock.acquire("k", &other, Duration::from_secs(10)).is_err());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(
            lock.renew("k", &holder, Duration::from_secs(10)),
            Err(LockError::LeaseExpired { key: "k".into() })
        );
    }
}
