//! Distributed locking subsystem.
//!
//! # Data Flow
//! ```text
//! caller (controller cycle / operator write)
//!     → distributed.rs acquire(key, token, lease)
//!     → table.rs conditional put (free or expired only)
//!     → Lease { fencing_token } or Unavailable
//!
//! caller done
//!     → release(key, token) → delete-if-match
//! ```
//!
//! # Design Decisions
//! - Non-blocking: contention returns `Unavailable`, callers retry next cycle
//! - Expired leases are reclaimable by anyone
//! - Fencing tokens are strictly increasing per table

pub mod distributed;
pub mod table;

pub use distributed::{DistributedLock, HolderToken, Lease, LockError};
pub use table::{LockRow, LockTable, MemoryLockTable};
