//! Least outstanding requests selection.

use std::sync::Arc;

use crate::fleet::FleetMember;
use crate::load_balancer::LoadBalancer;

/// Selects the member with the fewest in-flight requests.
#[derive(Debug, Default)]
pub struct LeastOutstanding;

impl LeastOutstanding {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastOutstanding {
    fn next_member(&self, members: &[Arc<FleetMember>]) -> Option<Arc<FleetMember>> {
        // ties go to the first member (stable)
        members.iter().min_by_key(|m| m.in_flight()).cloned()
    }
}
