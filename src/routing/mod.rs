//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (rule lookup, ascending priority)
//!     → matcher.rs (evaluate path/host patterns)
//!     → rules.rs action:
//!         forward → registry healthy snapshot → load balancer → member
//!         fixed   → static status/body
//! ```
//!
//! # Design Decisions
//! - Rules validated as a whole before they go live
//! - No regex in hot path (wildcards only)
//! - Deterministic: same input always matches same rule
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;
pub mod rules;

pub use matcher::{HostPattern, PathPattern, RouteRequest};
pub use router::{RouteDecision, RouteError, TrafficRouter};
pub use rules::{FixedResponse, RoutingRule, RuleAction, RuleError, RuleSet};
