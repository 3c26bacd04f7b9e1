//! Scripted collaborators for controller unit tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{ControllerConfig, HealthCheckConfig};
use crate::controller::capacity::CapacitySpec;
use crate::controller::reconciler::{CapacityController, ControllerParts};
use crate::fleet::{FleetMember, MemberId};
use crate::health::{HealthChecker, Probe, ProbeError};
use crate::lock::{DistributedLock, MemoryLockTable};
use crate::provision::{Instance, LaunchTemplate, ProvisionError, Provisioner};
use crate::registry::TargetRegistry;
use crate::state::{BucketSettings, Credentials, MemoryObjectStore, VersionedStateStore};

/// Hands out `i-1`, `i-2`, ... on 127.0.0.1:10001, 10002, ...
#[derive(Debug)]
pub struct ScriptedProvisioner {
    next: AtomicU32,
    pub failing_launches: AtomicU32,
    pub ready: AtomicBool,
    pub fail_terminate: AtomicBool,
    pub terminated: Mutex<Vec<MemberId>>,
}

impl Default for ScriptedProvisioner {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(0),
            failing_launches: AtomicU32::new(0),
            ready: AtomicBool::new(true),
            fail_terminate: AtomicBool::new(false),
            terminated: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedProvisioner {
    pub fn launched(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> Vec<MemberId> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provisioner for ScriptedProvisioner {
    async fn launch(&self, _template: &LaunchTemplate) -> Result<Instance, ProvisionError> {
        let failing = self.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_launches.store(failing - 1, Ordering::SeqCst);
            return Err(ProvisionError::CapacityExhausted);
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Instance {
            id: MemberId::new(format!("i-{}", n)),
            address: format!("127.0.0.1:{}", 10_000 + n).parse().unwrap(),
        })
    }

    async fn terminate(&self, id: &MemberId) -> Result<(), ProvisionError> {
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(ProvisionError::Provider("terminate rejected".to_string()));
        }
        self.terminated.lock().unwrap().push(id.clone());
        Ok(())
    }

    async fn is_ready(&self, _id: &MemberId) -> Result<bool, ProvisionError> {
        Ok(self.ready.load(Ordering::SeqCst))
    }
}

/// Succeeds for every member not in `failing`.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    pub failing: Mutex<HashSet<MemberId>>,
}

impl ScriptedProbe {
    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(MemberId::new(id));
    }

    pub fn recover(&self, id: &str) {
        self.failing.lock().unwrap().remove(&MemberId::new(id));
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn check(&self, member: &FleetMember) -> Result<(), ProbeError> {
        if self.failing.lock().unwrap().contains(&member.id) {
            Err(ProbeError::Status(503))
        } else {
            Ok(())
        }
    }
}

pub struct Fixture {
    pub controller: CapacityController,
    pub provisioner: Arc<ScriptedProvisioner>,
    pub probe: Arc<ScriptedProbe>,
    pub health: Arc<HealthChecker>,
    pub registry: Arc<TargetRegistry>,
    pub store: VersionedStateStore,
    pub lock: DistributedLock,
}

pub fn store() -> VersionedStateStore {
    VersionedStateStore::open(
        Arc::new(MemoryObjectStore::new(BucketSettings::default())),
        Credentials::Principal("test".to_string()),
        "fleet/web",
    )
    .unwrap()
}

/// Health probes only fire at watch time unless `interval_secs` is lowered,
/// so tests drive health explicitly through `probe_once`.
pub fn health_config() -> HealthCheckConfig {
    HealthCheckConfig {
        interval_secs: 3_600,
        ..HealthCheckConfig::default()
    }
}

pub fn fixture(capacity: CapacitySpec) -> Fixture {
    fixture_with(capacity, store(), health_config())
}

pub fn fixture_with(
    capacity: CapacitySpec,
    store: VersionedStateStore,
    health_config: HealthCheckConfig,
) -> Fixture {
    let provisioner = Arc::new(ScriptedProvisioner::default());
    let probe = Arc::new(ScriptedProbe::default());
    let registry = Arc::new(TargetRegistry::new("web"));
    let health = Arc::new(HealthChecker::new(
        probe.clone(),
        &health_config,
        vec![registry.clone()],
    ));
    let lock = DistributedLock::new(Arc::new(MemoryLockTable::new()));

    let controller = CapacityController::recover(ControllerParts {
        fleet_id: "web".to_string(),
        lock: lock.clone(),
        store: store.clone(),
        provisioner: provisioner.clone(),
        registry: registry.clone(),
        health: health.clone(),
        config: ControllerConfig {
            drain_timeout_secs: 5,
            ..ControllerConfig::default()
        },
        template: LaunchTemplate::default(),
        bootstrap_capacity: capacity,
    })
    .unwrap();

    Fixture {
        controller,
        provisioner,
        probe,
        health,
        registry,
        store,
        lock,
    }
}
