//! Member health state machine.
//!
//! # States
//! - Unknown: freshly launched, not yet eligible for traffic
//! - Healthy: member receives traffic
//! - Unhealthy: member excluded from routing
//!
//! # State Transitions
//! ```text
//! Unknown   → Healthy:   consecutive successes >= healthy_threshold
//! Unknown   → Unhealthy: consecutive failures >= unhealthy_threshold
//! Healthy   → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy:   consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Counter updates are serialized per member (mutex), status is mirrored
//!   into an atomic for lock-free reads on the routing path
//! - Counters reset on state transition

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

/// Health status of a fleet member.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Consecutive-result thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub healthy: u32,
    pub unhealthy: u32,
}

/// A status change produced by a probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

#[derive(Debug, Default)]
struct Counters {
    status: HealthStatus,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

/// Per-member health tracker.
#[derive(Debug, Default)]
pub struct HealthTracker {
    counters: Mutex<Counters>,
    status: AtomicU8,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status, lock-free.
    pub fn status(&self) -> HealthStatus {
        HealthStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    /// (consecutive successes, consecutive failures)
    pub fn counters(&self) -> (u32, u32) {
        let c = self.counters.lock().expect("health counters mutex poisoned");
        (c.consecutive_successes, c.consecutive_failures)
    }

    /// Report a successful probe.
    pub fn record_success(&self, thresholds: Thresholds) -> Option<HealthTransition> {
        let mut c = self.counters.lock().expect("health counters mutex poisoned");
        c.consecutive_failures = 0;

        if c.status == HealthStatus::Healthy {
            return None;
        }

        c.consecutive_successes += 1;
        if c.consecutive_successes >= thresholds.healthy {
            return Some(self.transition(&mut c, HealthStatus::Healthy));
        }
        None
    }

    /// Report a failed (or timed-out) probe.
    pub fn record_failure(&self, thresholds: Thresholds) -> Option<HealthTransition> {
        let mut c = self.counters.lock().expect("health counters mutex poisoned");
        c.consecutive_successes = 0;

        if c.status == HealthStatus::Unhealthy {
            return None;
        }

        c.consecutive_failures += 1;
        if c.consecutive_failures >= thresholds.unhealthy {
            return Some(self.transition(&mut c, HealthStatus::Unhealthy));
        }
        None
    }

    fn transition(&self, c: &mut Counters, to: HealthStatus) -> HealthTransition {
        let from = c.status;
        c.status = to;
        c.consecutive_successes = 0;
        c.consecutive_failures = 0;
        self.status.store(to as u8, Ordering::Release);
        HealthTransition { from, to }
    }
}
