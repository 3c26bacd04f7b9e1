//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Provisioner call (launch/terminate):
//!     → retries.rs (bounded attempts)
//!     → backoff.rs (exponential delay with jitter between attempts)
//!
//! Scale-in drain:
//!     → timeouts.rs (wait for in-flight == 0, or give up at the deadline)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every wait has a deadline
//! - Retries are bounded; exhaustion is surfaced to the caller

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{retry_with_backoff, Exhausted, RetryPolicy};
pub use timeouts::wait_for_drain;
