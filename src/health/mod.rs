//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Per-member timer
//!     → probe.rs (HTTP GET or TCP connect, wrapped in a timeout)
//!     → Update state.rs
//!     → On transition: refresh target registries
//!
//! State machine (state.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Only the checker mutates member health
//! - State transitions require consecutive successes/failures
//! - Health state is per-member, not per-group

pub mod active;
pub mod probe;
pub mod state;

pub use active::HealthChecker;
pub use probe::{build_probe, HttpProbe, Probe, ProbeError, StatusMatcher, TcpProbe};
pub use state::{HealthStatus, HealthTracker, HealthTransition, Thresholds};
