//! Backing key-value table for lock rows.
//!
//! # Responsibilities
//! - Conditional put: insert only if the key is free or its lease expired
//! - Delete-if-match and extend-if-match on the holder token
//! - Hand out strictly increasing fencing tokens on every insert
//!
//! # Design Decisions
//! - Each conditional operation is a single atomic step on the row
//!   (dashmap entry lock), never a read followed by a write
//! - Lease time is monotonic (`tokio::time::Instant`)

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::lock::distributed::{HolderToken, LockError};

/// A stored lock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    pub key: String,
    pub holder: HolderToken,
    pub acquired_at: Instant,
    pub expires_at: Instant,
    pub fencing_token: u64,
}

impl LockRow {
    /// A lease is reclaimable strictly after its expiry instant.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Result of a conditional insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Row written; carries the fencing token assigned to it.
    Inserted(LockRow),
    /// A live row exists for the key.
    Conflict(LockRow),
}

/// Result of a conditional delete or extend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Applied(LockRow),
    NotHolder,
    Expired,
}

/// Strongly consistent table with conditional writes.
pub trait LockTable: Send + Sync + std::fmt::Debug {
    /// Insert a row for `key` unless a non-expired row already exists.
    fn put_if_free(
        &self,
        key: &str,
        holder: &HolderToken,
        lease: Duration,
        now: Instant,
    ) -> Result<PutOutcome, LockError>;

    /// Delete the row only if `holder` matches the stored holder.
    fn delete_if_holder(&self, key: &str, holder: &HolderToken) -> Result<MatchOutcome, LockError>;

    /// Push the expiry of a live row out to `now + lease` if `holder` matches.
    fn extend_if_holder(
        &self,
        key: &str,
        holder: &HolderToken,
        lease: Duration,
        now: Instant,
    ) -> Result<MatchOutcome, LockError>;

    /// Read the current row, expired or not.
    fn get(&self, key: &str) -> Result<Option<LockRow>, LockError>;
}

/// In-process lock table.
#[derive(Debug, Default)]
pub struct MemoryLockTable {
    rows: DashMap<String, LockRow>,
    fencing: AtomicU64,
}

impl MemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table whose first fencing token is `floor + 1`. Used when the process
    /// restarts and must not hand out tokens already recorded in durable state.
    pub fn with_fencing_floor(floor: u64) -> Self {
        Self {
            rows: DashMap::new(),
            fencing: AtomicU64::new(floor),
        }
    }

    fn new_row(&self, key: &str, holder: &HolderToken, lease: Duration, now: Instant) -> LockRow {
        LockRow {
            key: key.to_string(),
            holder: holder.clone(),
            acquired_at: now,
            expires_at: now + lease,
            fencing_token: self.fencing.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }
}

impl LockTable for MemoryLockTable {
    fn put_if_free(
        &self,
        key: &str,
        holder: &HolderToken,
        lease: Duration,
        now: Instant,
    ) -> Result<PutOutcome, LockError> {
        match self.rows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Ok(PutOutcome::Conflict(occupied.get().clone()));
                }
                let row = self.new_row(key, holder, lease, now);
                occupied.insert(row.clone());
                Ok(PutOutcome::Inserted(row))
            }
            Entry::Vacant(vacant) => {
                let row = self.new_row(key, holder, lease, now);
                vacant.insert(row.clone());
                Ok(PutOutcome::Inserted(row))
            }
        }
    }

    fn delete_if_holder(&self, key: &str, holder: &HolderToken) -> Result<MatchOutcome, LockError> {
        match self.rows.remove_if(key, |_, row| &row.holder == holder) {
            Some((_, row)) => Ok(MatchOutcome::Applied(row)),
            None => Ok(MatchOutcome::NotHolder),
        }
    }

    fn extend_if_holder(
        &self,
        key: &str,
        holder: &HolderToken,
        lease: Duration,
        now: Instant,
    ) -> Result<MatchOutcome, LockError> {
        match self.rows.get_mut(key) {
            Some(mut row) if &row.holder == holder => {
                if row.is_expired(now) {
                    return Ok(MatchOutcome::Expired);
                }
                row.expires_at = now + lease;
                Ok(MatchOutcome::Applied(row.value().clone()))
            }
            _ => Ok(MatchOutcome::NotHolder),
        }
    }

    fn get(&self, key: &str) -> Result<Option<LockRow>, LockError> {
        Ok(self.rows.get(key).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fencing_tokens_increase() {
        let table = MemoryLockTable::new();
        let now = Instant::now();
        let a = HolderToken::generate();
        let b = HolderToken::generate();

        let first = match table.put_if_free("k", &a, Duration::from_secs(1), now).unwrap() {
            PutOutcome::Inserted(row) => row.fencing_token,
            other => panic!("unexpected {:?}", other),
        };
        table.delete_if_holder("k", &a).unwrap();
        let second = match table.put_if_free("k", &b, Duration::from_secs(1), now).unwrap() {
            PutOutcome::Inserted(row) => row.fencing_token,
            other => panic!("unexpected {:?}", other),
        };
        assert!(second > first);
    }

    #[test]
    fn test_expired_row_is_replaced() {
        let table = MemoryLockTable::new();
        let now = Instant::now();
        let a = HolderToken::generate();
        let b = HolderToken::generate();

        table.put_if_free("k", &a, Duration::from_secs(5), now).unwrap();
        let later = now + Duration::from_secs(6);
        let outcome = table.put_if_free("k", &b, Duration::from_secs(5), later).unwrap();
        assert!(matches!(outcome, PutOutcome::Inserted(ref row) if row.holder == b));

        // the late holder cannot extend or delete the reclaimed row
        assert_eq!(
            table.extend_if_holder("k", &a, Duration::from_secs(5), later).unwrap(),
            MatchOutcome::NotHolder
        );
        assert_eq!(table.delete_if_holder("k", &a).unwrap(), MatchOutcome::NotHolder);
    }
}
