//! Durable control-plane state.
//!
//! # Data Flow
//! ```text
//! operator change (under fleet lock)
//!     → versioned.rs put_expecting(latest, payload)
//!     → object_store.rs immutable versioned write
//!     → new VersionId
//!
//! controller start
//!     → versioned.rs latest() → recover last intended capacity
//! ```
//!
//! # Design Decisions
//! - Append-only: no operation removes a version
//! - Container policy is checked when the store is opened; unsafe settings
//!   refuse to open rather than warn

pub mod object_store;
pub mod versioned;

pub use object_store::{
    BucketSettings, Credentials, Encryption, FileObjectStore, MemoryObjectStore, ObjectStore,
    StateVersion, StoreError, VersionId,
};
pub use versioned::VersionedStateStore;
