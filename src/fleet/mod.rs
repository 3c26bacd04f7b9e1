//! Fleet membership primitives.
//!
//! # Data Flow
//! ```text
//! provisioner launch → Instance
//!     → member.rs (FleetMember, health Unknown, InService)
//!     → registry (eligible for traffic once healthy)
//!     → drain: Draining → wait in-flight == 0 → Terminated
//! ```

pub mod member;

pub use member::{FleetMember, InFlightGuard, Lifecycle, MemberId};
