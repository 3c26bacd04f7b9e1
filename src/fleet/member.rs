//! Fleet member abstraction.
//!
//! # Responsibilities
//! - Represent a single launched worker instance
//! - Track in-flight requests (drain and least-outstanding balancing)
//! - Track lifecycle (in service, draining, terminated)
//! - Own the member's health tracker (mutated only by the health checker)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use url::Url;

use crate::health::state::HealthTracker;
use crate::provision::Instance;

/// Opaque instance identifier handed out by the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a member as seen by the capacity controller.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    InService = 0,
    Draining = 1,
    Terminated = 2,
}

impl From<u8> for Lifecycle {
    fn from(val: u8) -> Self {
        match val {
            1 => Lifecycle::Draining,
            2 => Lifecycle::Terminated,
            _ => Lifecycle::InService,
        }
    }
}

/// A single worker instance in the fleet.
#[derive(Debug)]
pub struct FleetMember {
    /// Identity assigned by the provisioner.
    pub id: MemberId,
    /// Address the member serves traffic and health probes on.
    pub address: SocketAddr,
    /// Launch template revision this member was created from.
    pub template_revision: u64,
    /// Wall-clock launch time (reporting only).
    pub launched_at: SystemTime,
    /// Health state, mutated exclusively by the health checker.
    pub health: HealthTracker,

    launched: Instant,
    lifecycle: AtomicU8,
    in_flight: AtomicUsize,
}

impl FleetMember {
    /// Create an in-service member from a ready instance. Health starts `Unknown`.
    pub fn new(instance: Instance, template_revision: u64) -> Self {
        Self {
            id: instance.id,
            address: instance.address,
            template_revision,
            launched_at: SystemTime::now(),
            health: HealthTracker::new(),
            launched: Instant::now(),
            lifecycle: AtomicU8::new(Lifecycle::InService as u8),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Build the upstream URL for a request path (and optional query).
    pub fn url_for(&self, path_and_query: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("http://{}", self.address))?.join(path_and_query)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from(self.lifecycle.load(Ordering::Acquire))
    }

    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.store(lifecycle as u8, Ordering::Release);
    }

    /// Live members count toward capacity; draining and terminated ones do not.
    pub fn is_live(&self) -> bool {
        self.lifecycle() == Lifecycle::InService
    }

    /// Time since launch on the monotonic clock.
    pub fn age(&self) -> Duration {
        self.launched.elapsed()
    }

    /// Number of requests currently being proxied to this member.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start tracking a proxied request; the count drops when the guard does.
    pub fn begin_request(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            member: self.clone(),
        }
    }
}

/// A RAII guard that manages the in-flight request count.
#[derive(Debug)]
pub struct InFlightGuard {
    pub member: Arc<FleetMember>,
}

impl Deref for InFlightGuard {
    type Target = FleetMember;
    fn deref(&self) -> &Self::Target {
        &self.member
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.member.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(addr: &str) -> Arc<FleetMember> {
        Arc::new(FleetMember::new(
            Instance {
                id: MemberId::new("i-1"),
                address: addr.parse().unwrap(),
            },
            1,
        ))
    }

    #[test]
    fn test_in_flight_guard() {
        let m = member("127.0.0.1:9000");
        let g1 = m.begin_request();
        let g2 = m.begin_request();
        assert_eq!(m.in_flight(), 2);
        drop(g1);
        assert_eq!(m.in_flight(), 1);
        drop(g2);
        assert_eq!(m.in_flight(), 0);
    }

    #[test]
    fn test_url_for() {
        let m = member("10.0.0.7:8080");
        let url = m.url_for("/api/users?page=2").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.7:8080/api/users?page=2");
    }

    #[test]
    fn test_lifecycle() {
        let m = member("127.0.0.1:9000");
        assert!(m.is_live());
        m.set_lifecycle(Lifecycle::Draining);
        assert!(!m.is_live());
        assert_eq!(m.lifecycle(), Lifecycle::Draining);
    }
}
