//! Operator-facing operations.
//!
//! Read-only status views plus the single mutating path: a locked
//! read-modify-write of the desired capacity (and rollback, which is the
//! same write with an older record's capacity).

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::controller::capacity::CapacitySpec;
use crate::controller::reconciler::{
    decode, CapacityController, ControllerResult, CurrentRecord, CycleReport, ReconcilePhase,
};
use crate::fleet::{Lifecycle, MemberId};
use crate::health::HealthStatus;
use crate::state::VersionId;

/// One member as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub id: MemberId,
    pub address: SocketAddr,
    pub health: HealthStatus,
    pub lifecycle: Lifecycle,
    pub registered: bool,
    pub in_flight: usize,
    pub template_revision: u64,
    pub age_secs: u64,
}

/// Fleet summary.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub fleet_id: String,
    pub record_version: VersionId,
    pub capacity: CapacitySpec,
    pub phase: ReconcilePhase,
    pub live: usize,
    pub healthy: usize,
    pub template_revision: u64,
    pub last_cycle: Option<CycleReport>,
    pub last_error: Option<String>,
}

/// One entry of the capacity audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityVersion {
    pub version: VersionId,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub capacity: CapacitySpec,
    pub fencing_token: u64,
    pub updated_by: String,
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl CapacityController {
    pub fn status(&self) -> FleetStatus {
        let current = self.record.load();
        let status = self.status.lock().expect("controller status mutex poisoned");
        FleetStatus {
            fleet_id: self.fleet_id.clone(),
            record_version: current.version,
            capacity: current.record.capacity,
            phase: status.phase,
            live: self.live_members().len(),
            healthy: self.registry.current_healthy_set().len(),
            template_revision: self.template.load().revision,
            last_cycle: status.last_report.clone(),
            last_error: status.last_error.clone(),
        }
    }

    /// All tracked members (in service and draining), ordered by id.
    pub fn members(&self) -> Vec<MemberView> {
        let mut views: Vec<MemberView> = self
            .members
            .iter()
            .map(|entry| {
                let m = entry.value();
                MemberView {
                    id: m.id.clone(),
                    address: m.address,
                    health: m.health.status(),
                    lifecycle: m.lifecycle(),
                    registered: self.registry.is_registered(&m.id),
                    in_flight: m.in_flight(),
                    template_revision: m.template_revision,
                    age_secs: m.age().as_secs(),
                }
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Change the desired count under the fleet lock. Bounds are kept.
    /// Setting the current value is a no-op that writes nothing.
    pub fn set_desired_capacity(
        &self,
        desired: u32,
        actor: &str,
    ) -> ControllerResult<Arc<CurrentRecord>> {
        let updated = self.with_fleet_lock(|lease| {
            let current = self.sync_record()?;
            if current.record.capacity.desired == desired {
                return Ok(current);
            }
            let capacity = current.record.capacity.with_desired(desired)?;
            self.write_record(lease, &current, capacity, actor)
        })?;
        self.wake();
        Ok(updated)
    }

    /// Re-append the capacity recorded at `version` as a new version.
    pub fn rollback_capacity(
        &self,
        version: VersionId,
        actor: &str,
    ) -> ControllerResult<Arc<CurrentRecord>> {
        let updated = self.with_fleet_lock(|lease| {
            let current = self.sync_record()?;
            let target = decode(self.store.get(Some(version))?)?;
            target.record.capacity.validate()?;
            self.write_record(
                lease,
                &current,
                target.record.capacity,
                &format!("{} (rollback to {})", actor, version),
            )
        })?;
        self.wake();
        Ok(updated)
    }

    /// Every recorded capacity, oldest first.
    pub fn capacity_history(&self) -> ControllerResult<Vec<CapacityVersion>> {
        self.store
            .list_versions()?
            .into_iter()
            .map(|version| {
                let stored = self.store.get(Some(version))?;
                let created_at = unix_secs(stored.created_at);
                let current = decode(stored)?;
                Ok(CapacityVersion {
                    version,
                    created_at,
                    capacity: current.record.capacity,
                    fencing_token: current.record.fencing_token,
                    updated_by: current.record.updated_by,
                })
            })
            .collect()
    }

    /// Whether some holder currently owns the fleet lock.
    pub fn lock_held(&self) -> ControllerResult<bool> {
        Ok(self.lock.is_held(&self.lock_key)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::controller::capacity::CapacitySpec;
    use crate::controller::reconciler::ControllerError;
    use crate::controller::test_support::fixture;
    use crate::state::VersionId;

    fn spec(min: u32, max: u32, desired: u32) -> CapacitySpec {
        CapacitySpec::new(min, max, desired).unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_desired_writes_nothing() {
        let f = fixture(spec(1, 4, 2));
        let current = f.controller.set_desired_capacity(2, "ops").unwrap();
        assert_eq!(current.version, VersionId(1));
        assert_eq!(f.store.list_versions().unwrap(), vec![VersionId(1)]);
        assert!(!f.controller.lock_held().unwrap());
    }

    #[tokio::test]
    async fn test_history_and_rollback() {
        let f = fixture(spec(1, 8, 2));
        f.controller.set_desired_capacity(5, "alice").unwrap();
        f.controller.set_desired_capacity(7, "bob").unwrap();

        let updated = f.controller.rollback_capacity(VersionId(2), "carol").unwrap();
        assert_eq!(updated.version, VersionId(4));
        assert_eq!(updated.record.capacity.desired, 5);
        assert_eq!(updated.record.updated_by, "carol (rollback to v2)");

        let history = f.controller.capacity_history().unwrap();
        let desired: Vec<u32> = history.iter().map(|v| v.capacity.desired).collect();
        assert_eq!(desired, vec![2, 5, 7, 5]);
        assert_eq!(history[0].updated_by, "bootstrap");
        assert_eq!(history[0].fencing_token, 0);
        assert!(history[3].fencing_token > history[1].fencing_token);
    }

    #[tokio::test]
    async fn test_rollback_to_missing_version_fails() {
        let f = fixture(spec(1, 8, 2));
        let err = f.controller.rollback_capacity(VersionId(9), "ops").unwrap_err();
        assert!(matches!(err, ControllerError::Store(_)));
        assert_eq!(f.store.list_versions().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_and_member_views() {
        let f = fixture(spec(1, 4, 3));
        f.controller.reconcile_once().await.unwrap();

        let status = f.controller.status();
        assert_eq!(status.fleet_id, "web");
        assert_eq!(status.live, 3);
        assert_eq!(status.capacity.desired, 3);
        assert_eq!(status.template_revision, 1);
        assert!(status.last_cycle.is_some());
        assert!(status.last_error.is_none());

        let members = f.controller.members();
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|m| m.registered));
        assert_eq!(members[0].id.as_str(), "i-1");

        let json = serde_json::to_value(&members[0]).unwrap();
        assert_eq!(json["lifecycle"], "in_service");
    }
}
