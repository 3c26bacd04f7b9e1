//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every watched member
//! - Feed results into the member's hysteresis tracker
//! - Refresh target registries when a member changes status

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::fleet::{FleetMember, Lifecycle, MemberId};
use crate::health::probe::{Probe, ProbeError};
use crate::health::state::{HealthStatus, HealthTransition, Thresholds};
use crate::observability::metrics;
use crate::registry::TargetRegistry;

struct CheckerInner {
    probe: Arc<dyn Probe>,
    interval: Duration,
    timeout: Duration,
    thresholds: Thresholds,
    registries: Vec<Arc<TargetRegistry>>,
}

impl CheckerInner {
    async fn probe_once(&self, member: &FleetMember) -> Option<HealthTransition> {
        let outcome = match time::timeout(self.timeout, self.probe.check(member)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        };

        let transition = match &outcome {
            Ok(()) => {
                tracing::trace!(member = %member.id, "Probe succeeded");
                member.health.record_success(self.thresholds)
            }
            Err(e) => {
                tracing::trace!(member = %member.id, error = %e, "Probe failed");
                member.health.record_failure(self.thresholds)
            }
        };

        metrics::record_member_health(member.id.as_str(), member.health.is_healthy());

        if let Some(t) = transition {
            if t.to == HealthStatus::Healthy {
                tracing::info!(member = %member.id, from = t.from.as_str(), "Member became healthy");
            } else {
                tracing::warn!(
                    member = %member.id,
                    from = t.from.as_str(),
                    to = t.to.as_str(),
                    error = ?outcome.err(),
                    "Member failed health checks"
                );
            }
            metrics::record_health_transition(t.to.as_str());
            for registry in &self.registries {
                registry.refresh();
            }
        }
        transition
    }
}

/// Runs one probe loop per watched member.
pub struct HealthChecker {
    inner: Arc<CheckerInner>,
    tasks: DashMap<MemberId, JoinHandle<()>>,
}

impl HealthChecker {
    pub fn new(
        probe: Arc<dyn Probe>,
        config: &HealthCheckConfig,
        registries: Vec<Arc<TargetRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(CheckerInner {
                probe,
                interval: config.interval(),
                timeout: config.timeout(),
                thresholds: config.thresholds(),
                registries,
            }),
            tasks: DashMap::new(),
        }
    }

    /// Start probing `member` every interval, first probe immediately.
    /// Must be called from within a tokio runtime.
    pub fn watch(&self, member: Arc<FleetMember>) {
        let inner = self.inner.clone();
        let id = member.id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(inner.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if member.lifecycle() == Lifecycle::Terminated {
                    break;
                }
                inner.probe_once(&member).await;
            }
        });

        if let Some(previous) = self.tasks.insert(id.clone(), handle) {
            previous.abort();
        }
        tracing::debug!(member = %id, "Health checks started");
    }

    /// Stop probing a member. Returns false if it was not watched.
    pub fn unwatch(&self, id: &MemberId) -> bool {
        match self.tasks.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                tracing::debug!(member = %id, "Health checks stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, id: &MemberId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Run a single probe outside the periodic loop.
    pub async fn probe_once(&self, member: &FleetMember) -> Option<HealthTransition> {
        self.inner.probe_once(member).await
    }

    /// Abort every probe loop.
    pub fn stop(&self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.stop();
    }
}
