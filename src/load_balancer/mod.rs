//! Member selection.
//!
//! # Data Flow
//! ```text
//! Rule matched → forward to target group
//!     → registry.current_healthy_set() (snapshot)
//!     → LoadBalancer::next_member(snapshot):
//!         - round_robin.rs (rotate through members)
//!         - least_outstanding.rs (fewest in-flight requests)
//!     → member or None (empty set)
//! ```
//!
//! # Design Decisions
//! - Balancers only ever pick from the slice they are given; the caller
//!   passes the healthy snapshot, so an absent member is never chosen
//! - Balancers hold no membership state, only their own cursor

pub mod least_outstanding;
pub mod round_robin;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::fleet::FleetMember;

pub use least_outstanding::LeastOutstanding;
pub use round_robin::RoundRobin;

/// Selection strategy over a healthy snapshot.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_member(&self, members: &[Arc<FleetMember>]) -> Option<Arc<FleetMember>>;
}

/// Configurable balancing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Balancing {
    #[default]
    RoundRobin,
    LeastOutstanding,
}

impl Balancing {
    pub fn build(self) -> Box<dyn LoadBalancer> {
        match self {
            Balancing::RoundRobin => Box::new(RoundRobin::new()),
            Balancing::LeastOutstanding => Box::new(LeastOutstanding::new()),
        }
    }
}
