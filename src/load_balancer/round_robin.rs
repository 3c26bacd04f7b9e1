//! Round-robin selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::fleet::FleetMember;
use crate::load_balancer::LoadBalancer;

/// Round-robin selector.
/// Stores an internal counter to rotate through members.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_member(&self, members: &[Arc<FleetMember>]) -> Option<Arc<FleetMember>> {
        if members.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % members.len();
        Some(members[index].clone())
    }
}
