//! Capacity reconciliation.
//!
//! The reconciler is responsible for:
//! - Reading the recorded desired capacity from the versioned state store
//! - Comparing it with the live (in-service) member count
//! - Launching, draining and terminating members through the provisioner
//! - Registering/deregistering members with the target registry
//! - Replacing members on a stale launch template or stuck unhealthy
//!
//! Every cycle runs under the fleet lock; a second concurrent cycle is
//! rejected with `LockUnavailable` instead of queuing. The lease is renewed
//! every third of its duration while the cycle runs, and checked again
//! before each step that registers or drains a member.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ControllerConfig;
use crate::controller::capacity::{CapacityError, CapacitySpec, FleetRecord};
use crate::fleet::{FleetMember, Lifecycle, MemberId};
use crate::health::{HealthChecker, HealthStatus};
use crate::lock::{DistributedLock, HolderToken, Lease, LockError};
use crate::observability::metrics;
use crate::provision::{LaunchTemplate, ProvisionError, Provisioner};
use crate::registry::TargetRegistry;
use crate::resilience::{retry_with_backoff, wait_for_drain, RetryPolicy};
use crate::state::{StateVersion, StoreError, VersionId, VersionedStateStore};

const READY_POLL: Duration = Duration::from_millis(250);
const HEALTH_POLL: Duration = Duration::from_millis(250);

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that can occur while reconciling or changing desired state.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("fleet lock {key} is held elsewhere")]
    LockUnavailable { key: String },

    #[error("stale write: {0}")]
    StaleWrite(String),

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Provisioning {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: ProvisionError,
    },

    #[error("invalid capacity: {0}")]
    InvalidCapacity(#[from] CapacityError),

    #[error("state store error: {0}")]
    Store(StoreError),

    #[error("lock error: {0}")]
    Lock(LockError),

    #[error("fleet record {version} is unreadable: {source}")]
    CorruptRecord {
        version: VersionId,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding fleet record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<StoreError> for ControllerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StaleWrite { .. } => ControllerError::StaleWrite(e.to_string()),
            other => ControllerError::Store(other),
        }
    }
}

impl From<LockError> for ControllerError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Unavailable { key, .. } => ControllerError::LockUnavailable { key },
            other => ControllerError::Lock(other),
        }
    }
}

/// Phase of the current (or last) reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    #[default]
    Evaluating,
    ScalingOut,
    ScalingIn,
    Replacing,
    Stable,
}

impl ReconcilePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilePhase::Evaluating => "evaluating",
            ReconcilePhase::ScalingOut => "scaling_out",
            ReconcilePhase::ScalingIn => "scaling_in",
            ReconcilePhase::Replacing => "replacing",
            ReconcilePhase::Stable => "stable",
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub phase: ReconcilePhase,
    pub record_version: VersionId,
    pub target: u32,
    pub live_before: usize,
    pub live_after: usize,
    pub launched: Vec<MemberId>,
    pub terminated: Vec<MemberId>,
    pub failures: Vec<String>,
}

/// Launch template with the revision members are stamped with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateRevision {
    pub revision: u64,
    pub template: LaunchTemplate,
}

/// Latest durable desired state as known to this controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentRecord {
    pub version: VersionId,
    pub record: FleetRecord,
}

/// Fleet lease held for the duration of one cycle.
struct CycleLease {
    lease: Lease,
    lost: AtomicBool,
}

impl CycleLease {
    fn new(lease: Lease) -> Self {
        Self {
            lease,
            lost: AtomicBool::new(false),
        }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub(super) struct CycleStatus {
    pub(super) phase: ReconcilePhase,
    pub(super) last_report: Option<CycleReport>,
    pub(super) last_error: Option<String>,
}

/// Collaborators and settings a controller is built from.
pub struct ControllerParts {
    pub fleet_id: String,
    pub lock: DistributedLock,
    pub store: VersionedStateStore,
    pub provisioner: Arc<dyn Provisioner>,
    pub registry: Arc<TargetRegistry>,
    pub health: Arc<HealthChecker>,
    pub config: ControllerConfig,
    pub template: LaunchTemplate,
    /// Capacity written as version 1 when the store is empty.
    pub bootstrap_capacity: CapacitySpec,
}

/// The fleet's single reconciliation loop and desired-state writer.
pub struct CapacityController {
    pub(super) fleet_id: String,
    pub(super) lock_key: String,
    pub(super) lock: DistributedLock,
    pub(super) store: VersionedStateStore,
    pub(super) provisioner: Arc<dyn Provisioner>,
    pub(super) registry: Arc<TargetRegistry>,
    pub(super) health: Arc<HealthChecker>,
    pub(super) config: ControllerConfig,
    pub(super) retry: RetryPolicy,
    pub(super) template: ArcSwap<TemplateRevision>,
    pub(super) record: ArcSwap<CurrentRecord>,
    pub(super) members: DashMap<MemberId, Arc<FleetMember>>,
    pub(super) status: Mutex<CycleStatus>,
    pub(super) wake: Notify,
}

/// Highest fencing token recorded in the store, 0 when empty.
pub fn recorded_fencing_token(store: &VersionedStateStore) -> ControllerResult<u64> {
    match store.latest()? {
        Some(version) => Ok(decode(version)?.record.fencing_token),
        None => Ok(0),
    }
}

pub(super) fn decode(version: StateVersion) -> ControllerResult<CurrentRecord> {
    let record =
        FleetRecord::from_bytes(&version.payload).map_err(|source| ControllerError::CorruptRecord {
            version: version.version,
            source,
        })?;
    Ok(CurrentRecord {
        version: version.version,
        record,
    })
}

fn health_rank(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Unhealthy => 0,
        HealthStatus::Unknown => 1,
        HealthStatus::Healthy => 2,
    }
}

/// Order members by how expendable they are: unhealthy, then unknown, then
/// stale template revision, then oldest launch.
pub fn termination_order(members: &mut [Arc<FleetMember>], current_revision: u64) {
    members.sort_by_key(|m| {
        (
            health_rank(m.health.status()),
            m.template_revision == current_revision,
            Reverse(m.age()),
            m.id.clone(),
        )
    });
}

impl CapacityController {
    /// Build a controller and recover the last recorded desired state,
    /// bootstrapping version 1 when the store is empty.
    #[instrument(skip(parts), fields(fleet = %parts.fleet_id))]
    pub fn recover(parts: ControllerParts) -> ControllerResult<Self> {
        let current = match parts.store.latest()? {
            Some(version) => decode(version)?,
            None => Self::bootstrap(&parts)?,
        };
        info!(
            version = %current.version,
            min = current.record.capacity.min,
            max = current.record.capacity.max,
            desired = current.record.capacity.desired,
            "Recovered fleet record"
        );

        Ok(Self {
            lock_key: format!("fleet/{}", parts.fleet_id),
            fleet_id: parts.fleet_id,
            lock: parts.lock,
            store: parts.store,
            provisioner: parts.provisioner,
            registry: parts.registry,
            health: parts.health,
            retry: RetryPolicy::from(&parts.config),
            config: parts.config,
            template: ArcSwap::from_pointee(TemplateRevision {
                revision: 1,
                template: parts.template,
            }),
            record: ArcSwap::from_pointee(current),
            members: DashMap::new(),
            status: Mutex::new(CycleStatus::default()),
            wake: Notify::new(),
        })
    }

    fn bootstrap(parts: &ControllerParts) -> ControllerResult<CurrentRecord> {
        parts.bootstrap_capacity.validate()?;
        let record = FleetRecord {
            fleet_id: parts.fleet_id.clone(),
            capacity: parts.bootstrap_capacity,
            fencing_token: 0,
            updated_by: "bootstrap".to_string(),
        };
        match parts.store.put_expecting(None, &record.to_bytes()?) {
            Ok(version) => {
                info!(version = %version, "Bootstrapped empty state store");
                Ok(CurrentRecord { version, record })
            }
            // another controller bootstrapped first; adopt its record
            Err(StoreError::StaleWrite { .. }) => decode(parts.store.get(None)?),
            Err(e) => Err(e.into()),
        }
    }

    pub fn fleet_id(&self) -> &str {
        &self.fleet_id
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn current_record(&self) -> Arc<CurrentRecord> {
        self.record.load_full()
    }

    pub fn template(&self) -> Arc<TemplateRevision> {
        self.template.load_full()
    }

    /// Request an immediate cycle from the worker.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await
    }

    /// Members currently in service, ordered by id.
    pub fn live_members(&self) -> Vec<Arc<FleetMember>> {
        let mut live: Vec<_> = self
            .members
            .iter()
            .filter(|e| e.value().is_live())
            .map(|e| e.value().clone())
            .collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        live
    }

    /// Swap in a new launch template. Members on older revisions get
    /// replaced by later cycles. Returns false if nothing changed.
    pub fn update_launch_template(&self, template: LaunchTemplate) -> bool {
        let current = self.template.load();
        if current.template == template {
            return false;
        }
        let revision = current.revision + 1;
        self.template.store(Arc::new(TemplateRevision { revision, template }));
        info!(revision, "Launch template updated");
        self.wake();
        true
    }

    /// Re-read the latest record so changes by other writers are observed.
    pub(super) fn sync_record(&self) -> ControllerResult<Arc<CurrentRecord>> {
        let cached = self.record.load_full();
        let latest = self.store.latest()?.ok_or(StoreError::Empty)?;
        if latest.version == cached.version {
            return Ok(cached);
        }
        let current = Arc::new(decode(latest)?);
        info!(
            version = %current.version,
            desired = current.record.capacity.desired,
            "Observed new fleet record"
        );
        self.record.store(current.clone());
        Ok(current)
    }

    /// Run `f` while holding the fleet lock under a fresh holder token.
    pub(super) fn with_fleet_lock<T>(
        &self,
        f: impl FnOnce(&Lease) -> ControllerResult<T>,
    ) -> ControllerResult<T> {
        let holder = HolderToken::generate();
        let lease = self
            .lock
            .acquire(&self.lock_key, &holder, self.config.lock_lease())?;
        let result = f(&lease);
        self.release(&lease);
        result
    }

    fn release(&self, lease: &Lease) {
        if let Err(e) = self.lock.release(&lease.key, &lease.holder) {
            warn!(key = %lease.key, error = %e, "Failed to release fleet lock");
        }
    }

    /// Fail if the cycle's lease was lost, otherwise extend it.
    fn ensure_lease(&self, held: &CycleLease) -> ControllerResult<()> {
        if held.is_lost() {
            return Err(ControllerError::Lock(LockError::LeaseExpired {
                key: held.lease.key.clone(),
            }));
        }
        match self
            .lock
            .renew(&held.lease.key, &held.lease.holder, self.config.lock_lease())
        {
            Ok(_) => Ok(()),
            Err(e) => {
                held.mark_lost();
                Err(e.into())
            }
        }
    }

    /// Renew the cycle's lease every third of its duration. Returns only
    /// when a renewal fails.
    async fn keep_lease(&self, held: &CycleLease) {
        let period = self.config.lock_lease() / 3;
        loop {
            time::sleep(period).await;
            if held.is_lost() {
                return;
            }
            match self
                .lock
                .renew(&held.lease.key, &held.lease.holder, self.config.lock_lease())
            {
                Ok(lease) => debug!(key = %lease.key, "Fleet lease renewed"),
                Err(e) => {
                    error!(key = %held.lease.key, error = %e, "Fleet lease lost mid-cycle");
                    held.mark_lost();
                    return;
                }
            }
        }
    }

    /// Append a new record under `lease`, refusing writes from a lease
    /// older than the one that wrote `expected`.
    pub(super) fn write_record(
        &self,
        lease: &Lease,
        expected: &CurrentRecord,
        capacity: CapacitySpec,
        updated_by: &str,
    ) -> ControllerResult<Arc<CurrentRecord>> {
        if expected.record.fencing_token > lease.fencing_token {
            return Err(ControllerError::StaleWrite(format!(
                "record {} was written under fencing token {}, lease holds {}",
                expected.version, expected.record.fencing_token, lease.fencing_token
            )));
        }

        let record = FleetRecord {
            fleet_id: self.fleet_id.clone(),
            capacity,
            fencing_token: lease.fencing_token,
            updated_by: updated_by.to_string(),
        };
        let version = self
            .store
            .put_expecting(Some(expected.version), &record.to_bytes()?)?;

        info!(
            version = %version,
            desired = capacity.desired,
            updated_by,
            fencing_token = lease.fencing_token,
            "Desired capacity recorded"
        );
        let current = Arc::new(CurrentRecord { version, record });
        self.record.store(current.clone());
        metrics::record_fleet_size(self.live_members().len(), capacity.desired);
        Ok(current)
    }

    /// One reconciliation cycle under the fleet lock.
    #[instrument(skip(self), fields(fleet = %self.fleet_id))]
    pub async fn reconcile_once(&self) -> ControllerResult<CycleReport> {
        let holder = HolderToken::generate();
        let lease = match self
            .lock
            .acquire(&self.lock_key, &holder, self.config.lock_lease())
        {
            Ok(lease) => lease,
            Err(LockError::Unavailable { key, .. }) => {
                debug!(key = %key, "Fleet lock unavailable, skipping cycle");
                metrics::record_reconcile("skipped");
                return Err(ControllerError::LockUnavailable { key });
            }
            Err(e) => return Err(e.into()),
        };

        let held = CycleLease::new(lease);
        let outcome = {
            let cycle = self.run_cycle(&held);
            let keeper = self.keep_lease(&held);
            tokio::pin!(cycle, keeper);
            let mut keeping = true;
            loop {
                tokio::select! {
                    outcome = &mut cycle => break outcome,
                    () = &mut keeper, if keeping => keeping = false,
                }
            }
        };
        self.release(&held.lease);

        let mut status = self.status.lock().expect("controller status mutex poisoned");
        let result = match outcome {
            Ok((report, result)) => {
                status.phase = report.phase;
                status.last_report = Some(report.clone());
                result.map(|()| report)
            }
            Err(e) => Err(e),
        };
        match &result {
            Ok(report) => {
                status.last_error = None;
                metrics::record_reconcile(if report.phase == ReconcilePhase::Stable {
                    "stable"
                } else {
                    "changed"
                });
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
                metrics::record_reconcile("failed");
            }
        }
        result
    }

    fn set_phase(&self, phase: ReconcilePhase) {
        self.status
            .lock()
            .expect("controller status mutex poisoned")
            .phase = phase;
    }

    /// Outer error: nothing was attempted. Inner error: the cycle acted
    /// partially and the report says how far it got.
    async fn run_cycle(
        &self,
        held: &CycleLease,
    ) -> ControllerResult<(CycleReport, ControllerResult<()>)> {
        self.set_phase(ReconcilePhase::Evaluating);
        let current = self.sync_record()?;
        self.finish_pending_terminations().await;

        let target = current.record.capacity.target();
        let live = self.live_members();
        let mut report = CycleReport {
            phase: ReconcilePhase::Stable,
            record_version: current.version,
            target,
            live_before: live.len(),
            live_after: live.len(),
            launched: Vec::new(),
            terminated: Vec::new(),
            failures: Vec::new(),
        };

        let wanted = target as usize;
        let result = if live.len() < wanted {
            report.phase = ReconcilePhase::ScalingOut;
            self.set_phase(report.phase);
            self.scale_out(wanted - live.len(), held, &mut report).await
        } else if live.len() > wanted {
            report.phase = ReconcilePhase::ScalingIn;
            self.set_phase(report.phase);
            let excess = live.len() - wanted;
            match self.ensure_lease(held) {
                Ok(()) => self.scale_in(live, excess, &mut report).await,
                Err(e) => Err(e),
            }
        } else {
            let candidates = self.replacement_candidates(live);
            if candidates.is_empty() {
                Ok(())
            } else {
                report.phase = ReconcilePhase::Replacing;
                self.set_phase(report.phase);
                self.replace(candidates, held, &mut report).await
            }
        };

        report.live_after = self.live_members().len();
        metrics::record_fleet_size(report.live_after, current.record.capacity.desired);
        if report.phase != ReconcilePhase::Stable {
            info!(
                phase = report.phase.as_str(),
                target,
                live_before = report.live_before,
                live_after = report.live_after,
                launched = report.launched.len(),
                terminated = report.terminated.len(),
                failures = report.failures.len(),
                "Reconcile cycle complete"
            );
        }
        Ok((report, result))
    }

    async fn scale_out(
        &self,
        count: usize,
        held: &CycleLease,
        report: &mut CycleReport,
    ) -> ControllerResult<()> {
        let template = self.template.load_full();
        let results = join_all((0..count).map(|_| self.launch_member(&template, held))).await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(member) => report.launched.push(member.id.clone()),
                Err(e) => {
                    report.failures.push(e.to_string());
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn scale_in(
        &self,
        mut live: Vec<Arc<FleetMember>>,
        excess: usize,
        report: &mut CycleReport,
    ) -> ControllerResult<()> {
        termination_order(&mut live, self.template.load().revision);
        live.truncate(excess);

        let results = join_all(live.iter().map(|m| self.drain_and_terminate(m))).await;
        let mut first_error = None;
        for (member, result) in live.iter().zip(results) {
            match result {
                Ok(()) => report.terminated.push(member.id.clone()),
                Err(e) => {
                    report.failures.push(format!("{}: {}", member.id, e));
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn replacement_candidates(&self, mut live: Vec<Arc<FleetMember>>) -> Vec<Arc<FleetMember>> {
        let revision = self.template.load().revision;
        let grace = self.config.health_check_grace();
        live.retain(|m| {
            m.template_revision != revision
                || (self.config.replace_unhealthy
                    && m.health.status() == HealthStatus::Unhealthy
                    && m.age() >= grace)
        });
        termination_order(&mut live, revision);
        live.truncate(self.config.max_surge as usize);
        live
    }

    /// Create-before-destroy: the replacement must pass health checks before
    /// the original is drained.
    async fn replace(
        &self,
        old: Vec<Arc<FleetMember>>,
        held: &CycleLease,
        report: &mut CycleReport,
    ) -> ControllerResult<()> {
        let template = self.template.load_full();
        let results = join_all(old.iter().map(|m| self.replace_one(m, &template, held))).await;

        let mut first_error = None;
        for (member, result) in old.iter().zip(results) {
            match result {
                Ok(replacement) => {
                    report.launched.push(replacement);
                    report.terminated.push(member.id.clone());
                }
                Err(e) => {
                    report.failures.push(format!("{}: {}", member.id, e));
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn replace_one(
        &self,
        old: &Arc<FleetMember>,
        template: &TemplateRevision,
        held: &CycleLease,
    ) -> ControllerResult<MemberId> {
        let replacement = self.launch_member(template, held).await?;

        let healthy = time::timeout(self.config.health_check_grace(), async {
            while !replacement.health.is_healthy() && !held.is_lost() {
                time::sleep(HEALTH_POLL).await;
            }
        })
        .await
        .is_ok();

        // until the original starts draining, any failure discards the
        // replacement so the fleet never stays above target
        let promoted = if healthy {
            self.ensure_lease(held)
        } else {
            Err(ControllerError::Provisioning {
                operation: "replace",
                attempts: 1,
                source: ProvisionError::NotReady(replacement.id.clone()),
            })
        };
        if let Err(e) = promoted {
            warn!(
                member = %old.id,
                replacement = %replacement.id,
                error = %e,
                "Replacement abandoned, keeping original"
            );
            if let Err(te) = self.drain_and_terminate(&replacement).await {
                warn!(member = %replacement.id, error = %te, "Replacement left draining");
            }
            return Err(e);
        }

        self.drain_and_terminate(old).await?;
        info!(member = %old.id, replacement = %replacement.id, "Member replaced");
        Ok(replacement.id.clone())
    }

    /// Launch, wait for readiness, then register in `unknown` health.
    /// An instance that never becomes ready, or becomes ready after the lease
    /// was lost, is terminated and never registered.
    async fn launch_member(
        &self,
        template: &TemplateRevision,
        held: &CycleLease,
    ) -> ControllerResult<Arc<FleetMember>> {
        let instance = retry_with_backoff(self.retry, "launch", || {
            self.provisioner.launch(&template.template)
        })
        .await
        .map_err(|e| ControllerError::Provisioning {
            operation: "launch",
            attempts: e.attempts,
            source: e.error,
        })?;

        let ready = match self.await_ready(&instance.id).await {
            Ok(()) => self.ensure_lease(held),
            Err(e) => Err(e),
        };
        let member = Arc::new(FleetMember::new(instance, template.revision));
        if let Err(e) = ready {
            warn!(member = %member.id, error = %e, "Instance not admitted, terminating");
            if let Err(te) = self.terminate_instance(&member.id).await {
                // tracked unregistered so the next cycle retries the terminate
                error!(member = %member.id, error = %te, "Failed to terminate unadmitted instance");
                member.set_lifecycle(Lifecycle::Draining);
                self.members.insert(member.id.clone(), member);
            }
            return Err(e);
        }

        self.members.insert(member.id.clone(), member.clone());
        self.registry.register(member.clone());
        self.health.watch(member.clone());
        info!(
            member = %member.id,
            address = %member.address,
            revision = template.revision,
            "Member launched"
        );
        Ok(member)
    }

    async fn await_ready(&self, id: &MemberId) -> ControllerResult<()> {
        let wait = async {
            loop {
                match self.provisioner.is_ready(id).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => time::sleep(READY_POLL).await,
                    Err(e) => return Err(e),
                }
            }
        };
        match time::timeout(self.config.ready_timeout(), wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ControllerError::Provisioning {
                operation: "readiness",
                attempts: 1,
                source,
            }),
            Err(_) => Err(ControllerError::Provisioning {
                operation: "readiness",
                attempts: 1,
                source: ProvisionError::NotReady(id.clone()),
            }),
        }
    }

    async fn terminate_instance(&self, id: &MemberId) -> ControllerResult<()> {
        retry_with_backoff(self.retry, "terminate", || self.provisioner.terminate(id))
            .await
            .map_err(|e| ControllerError::Provisioning {
                operation: "terminate",
                attempts: e.attempts,
                source: e.error,
            })
    }

    /// Deregister, wait for in-flight requests (bounded), then terminate.
    async fn drain_and_terminate(&self, member: &Arc<FleetMember>) -> ControllerResult<()> {
        member.set_lifecycle(Lifecycle::Draining);
        self.registry.deregister(&member.id);
        let drained = wait_for_drain(member, self.config.drain_timeout()).await;
        self.health.unwatch(&member.id);

        self.terminate_instance(&member.id).await?;
        member.set_lifecycle(Lifecycle::Terminated);
        self.members.remove(&member.id);
        info!(member = %member.id, drained, "Member terminated");
        Ok(())
    }

    /// Members left draining by a failed terminate are retried first.
    async fn finish_pending_terminations(&self) {
        let pending: Vec<_> = self
            .members
            .iter()
            .filter(|e| e.value().lifecycle() == Lifecycle::Draining)
            .map(|e| e.value().clone())
            .collect();

        for member in pending {
            match self.terminate_instance(&member.id).await {
                Ok(()) => {
                    member.set_lifecycle(Lifecycle::Terminated);
                    self.members.remove(&member.id);
                    info!(member = %member.id, "Pending termination completed");
                }
                Err(e) => warn!(member = %member.id, error = %e, "Termination still failing"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::{fixture, fixture_with, health_config, store};
    use crate::config::HealthCheckConfig;
    use std::sync::atomic::Ordering;

    fn spec(min: u32, max: u32, desired: u32) -> CapacitySpec {
        CapacitySpec::new(min, max, desired).unwrap()
    }

    fn ids(members: &[Arc<FleetMember>]) -> Vec<String> {
        members.iter().map(|m| m.id.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_out_to_desired() {
        let f = fixture(spec(1, 10, 2));

        let report = f.controller.reconcile_once().await.unwrap();
        assert_eq!(report.phase, ReconcilePhase::ScalingOut);
        assert_eq!(report.launched.len(), 2);
        assert_eq!(f.controller.live_members().len(), 2);

        f.controller.set_desired_capacity(5, "ops").unwrap();
        let report = f.controller.reconcile_once().await.unwrap();
        assert_eq!(report.live_before, 2);
        assert_eq!(report.live_after, 5);
        assert_eq!(report.launched.len(), 3);

        for m in f.controller.live_members() {
            assert!(f.registry.is_registered(&m.id));
            assert!(f.health.is_watching(&m.id));
        }

        let report = f.controller.reconcile_once().await.unwrap();
        assert_eq!(report.phase, ReconcilePhase::Stable);
        assert_eq!(f.provisioner.launched(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_desired_outside_bounds_is_rejected() {
        let f = fixture(spec(2, 4, 2));
        let before = f.controller.current_record();

        let err = f.controller.set_desired_capacity(5, "ops").unwrap_err();
        assert!(matches!(err, ControllerError::InvalidCapacity(_)));
        let err = f.controller.set_desired_capacity(1, "ops").unwrap_err();
        assert!(matches!(err, ControllerError::InvalidCapacity(_)));

        assert_eq!(f.controller.current_record(), before);
        assert_eq!(f.store.list_versions().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skipped_while_lock_held() {
        let f = fixture(spec(1, 4, 3));
        let other = HolderToken::generate();
        f.lock
            .acquire("fleet/web", &other, Duration::from_secs(60))
            .unwrap();

        let err = f.controller.reconcile_once().await.unwrap_err();
        assert!(matches!(err, ControllerError::LockUnavailable { .. }));
        assert_eq!(f.provisioner.launched(), 0);

        let err = f.controller.set_desired_capacity(4, "ops").unwrap_err();
        assert!(matches!(err, ControllerError::LockUnavailable { .. }));

        // the lease lapses and the next cycle proceeds
        time::advance(Duration::from_secs(61)).await;
        f.controller.reconcile_once().await.unwrap();
        assert_eq!(f.controller.live_members().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_in_terminates_least_valuable_first() {
        let f = fixture(spec(1, 10, 4));
        f.controller.reconcile_once().await.unwrap();
        let live = f.controller.live_members();
        assert_eq!(ids(&live), vec!["i-1", "i-2", "i-3", "i-4"]);

        // i-1 healthy, i-3 unhealthy, i-2 and i-4 still unknown
        for _ in 0..2 {
            f.health.probe_once(&live[0]).await;
        }
        f.probe.fail("i-3");
        for _ in 0..3 {
            f.health.probe_once(&live[2]).await;
        }
        assert!(live[0].health.is_healthy());
        assert_eq!(live[2].health.status(), HealthStatus::Unhealthy);

        f.controller.set_desired_capacity(2, "ops").unwrap();
        let report = f.controller.reconcile_once().await.unwrap();
        assert_eq!(report.phase, ReconcilePhase::ScalingIn);
        assert_eq!(
            report.terminated,
            vec![MemberId::new("i-3"), MemberId::new("i-2")]
        );
        assert_eq!(ids(&f.controller.live_members()), vec!["i-1", "i-4"]);
        assert!(!f.registry.is_registered(&MemberId::new("i-3")));
        assert!(!f.health.is_watching(&MemberId::new("i-2")));
        assert_eq!(live[2].lifecycle(), Lifecycle::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_instance_is_terminated_and_never_registered() {
        let f = fixture(spec(1, 4, 1));
        f.provisioner.ready.store(false, Ordering::SeqCst);

        let err = f.controller.reconcile_once().await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Provisioning {
                operation: "readiness",
                ..
            }
        ));
        assert_eq!(f.provisioner.terminated(), vec![MemberId::new("i-1")]);
        assert!(f.controller.live_members().is_empty());
        assert!(f.registry.snapshot().registered().next().is_none());

        let status = f.controller.status();
        assert_eq!(status.phase, ReconcilePhase::ScalingOut);
        assert!(status.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_instance_with_failed_terminate_is_retried() {
        let f = fixture(spec(1, 4, 1));
        f.provisioner.ready.store(false, Ordering::SeqCst);
        f.provisioner.fail_terminate.store(true, Ordering::SeqCst);

        assert!(f.controller.reconcile_once().await.is_err());
        let members = f.controller.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, MemberId::new("i-1"));
        assert_eq!(members[0].lifecycle, Lifecycle::Draining);
        assert!(!members[0].registered);
        assert!(f.controller.live_members().is_empty());
        assert!(!f.health.is_watching(&MemberId::new("i-1")));

        f.provisioner.fail_terminate.store(false, Ordering::SeqCst);
        f.provisioner.ready.store(true, Ordering::SeqCst);
        let report = f.controller.reconcile_once().await.unwrap();
        assert_eq!(f.provisioner.terminated(), vec![MemberId::new("i-1")]);
        assert_eq!(report.launched, vec![MemberId::new("i-2")]);
        assert_eq!(ids(&f.controller.live_members()), vec!["i-2"]);
        assert_eq!(f.controller.members().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_outlives_slow_readiness() {
        let f = fixture(spec(1, 4, 1));
        f.provisioner.ready.store(false, Ordering::SeqCst);

        // the lease is 60s; readiness arrives at 70s
        let rival = async {
            time::sleep(Duration::from_secs(65)).await;
            let err = f
                .lock
                .acquire("fleet/web", &HolderToken::generate(), Duration::from_secs(60))
                .unwrap_err();
            assert!(matches!(err, LockError::Unavailable { .. }));
            time::sleep(Duration::from_secs(5)).await;
            f.provisioner.ready.store(true, Ordering::SeqCst);
        };
        let (report, ()) = tokio::join!(f.controller.reconcile_once(), rival);

        let report = report.unwrap();
        assert_eq!(report.launched, vec![MemberId::new("i-1")]);
        assert!(f.registry.is_registered(&MemberId::new("i-1")));
        assert!(!f.controller.lock_held().unwrap());
        assert!(f
            .lock
            .acquire("fleet/web", &HolderToken::generate(), Duration::from_secs(60))
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_retries_then_gives_up() {
        let f = fixture(spec(1, 4, 1));

        f.provisioner.failing_launches.store(2, Ordering::SeqCst);
        f.controller.reconcile_once().await.unwrap();
        assert_eq!(f.controller.live_members().len(), 1);

        f.controller.set_desired_capacity(2, "ops").unwrap();
        f.provisioner.failing_launches.store(10, Ordering::SeqCst);
        let err = f.controller.reconcile_once().await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Provisioning {
                operation: "launch",
                attempts: 3,
                ..
            }
        ));
        assert_eq!(f.controller.live_members().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_terminate_is_retried_next_cycle() {
        let f = fixture(spec(1, 4, 2));
        f.controller.reconcile_once().await.unwrap();

        f.controller.set_desired_capacity(1, "ops").unwrap();
        f.provisioner.fail_terminate.store(true, Ordering::SeqCst);
        assert!(f.controller.reconcile_once().await.is_err());
        assert_eq!(f.controller.live_members().len(), 1);
        assert_eq!(f.controller.members().len(), 2);

        f.provisioner.fail_terminate.store(false, Ordering::SeqCst);
        let report = f.controller.reconcile_once().await.unwrap();
        assert_eq!(report.phase, ReconcilePhase::Stable);
        assert_eq!(f.controller.members().len(), 1);
        assert_eq!(f.provisioner.terminated().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fencing_token_is_refused() {
        let f = fixture(spec(1, 4, 2));

        // a writer holding a later lease recorded its own change
        let newer = FleetRecord {
            fleet_id: "web".to_string(),
            capacity: spec(1, 4, 3),
            fencing_token: 100,
            updated_by: "other".to_string(),
        };
        f.store.put(&newer.to_bytes().unwrap()).unwrap();

        let err = f.controller.set_desired_capacity(4, "ops").unwrap_err();
        assert!(matches!(err, ControllerError::StaleWrite(_)));
        assert_eq!(f.controller.current_record().record, newer);
        assert_eq!(f.store.list_versions().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_reads_latest_record() {
        let shared = store();
        let first = fixture_with(spec(1, 8, 2), shared.clone(), health_config());
        first.controller.set_desired_capacity(6, "ops").unwrap();
        let token = recorded_fencing_token(&shared).unwrap();
        assert!(token > 0);

        // bootstrap capacity is ignored once a record exists
        let second = fixture_with(spec(1, 2, 1), shared.clone(), health_config());
        let current = second.controller.current_record();
        assert_eq!(current.record.capacity, spec(1, 8, 6));
        assert_eq!(current.version, VersionId(2));

        second.controller.reconcile_once().await.unwrap();
        assert_eq!(second.controller.live_members().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_template_change_replaces_members() {
        let fast = HealthCheckConfig {
            interval_secs: 1,
            ..HealthCheckConfig::default()
        };
        let f = fixture_with(spec(1, 4, 1), store(), fast);
        f.controller.reconcile_once().await.unwrap();
        let original = f.controller.live_members();

        let template = LaunchTemplate {
            image: "worker:v2".to_string(),
            ..LaunchTemplate::default()
        };
        assert!(f.controller.update_launch_template(template.clone()));
        assert!(!f.controller.update_launch_template(template));

        let report = f.controller.reconcile_once().await.unwrap();
        assert_eq!(report.phase, ReconcilePhase::Replacing);
        assert_eq!(report.terminated, vec![original[0].id.clone()]);

        let live = f.controller.live_members();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].template_revision, 2);
        assert!(live[0].health.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_replacement_keeps_lease_and_max() {
        let fast = HealthCheckConfig {
            interval_secs: 1,
            ..HealthCheckConfig::default()
        };
        let f = fixture_with(spec(1, 1, 1), store(), fast);
        f.controller.reconcile_once().await.unwrap();

        // the replacement fails its checks for longer than the lease
        f.probe.fail("i-2");
        f.controller.update_launch_template(LaunchTemplate {
            image: "worker:v2".to_string(),
            ..LaunchTemplate::default()
        });
        let heal = async {
            time::sleep(Duration::from_secs(70)).await;
            f.probe.recover("i-2");
        };
        let (report, ()) = tokio::join!(f.controller.reconcile_once(), heal);

        let report = report.unwrap();
        assert_eq!(report.phase, ReconcilePhase::Replacing);
        assert_eq!(report.launched, vec![MemberId::new("i-2")]);
        assert_eq!(report.terminated, vec![MemberId::new("i-1")]);
        assert_eq!(ids(&f.controller.live_members()), vec!["i-2"]);
        assert_eq!(f.controller.members().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_that_never_turns_healthy_is_discarded() {
        let fast = HealthCheckConfig {
            interval_secs: 1,
            ..HealthCheckConfig::default()
        };
        let f = fixture_with(spec(1, 4, 1), store(), fast);
        f.controller.reconcile_once().await.unwrap();
        let original = f.controller.live_members();

        f.probe.fail("i-2");
        f.controller.update_launch_template(LaunchTemplate {
            image: "worker:v2".to_string(),
            ..LaunchTemplate::default()
        });

        let err = f.controller.reconcile_once().await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Provisioning {
                operation: "replace",
                ..
            }
        ));
        assert_eq!(ids(&f.controller.live_members()), ids(&original));
        assert_eq!(f.provisioner.terminated(), vec![MemberId::new("i-2")]);
    }

    #[test]
    fn test_termination_order_prefers_stale_revision() {
        use crate::load_balancer::test_support::member;

        let a = member("i-a", 9001);
        let b = member("i-b", 9002);
        let stale = Arc::new(FleetMember::new(
            crate::provision::Instance {
                id: MemberId::new("i-c"),
                address: "127.0.0.1:9003".parse().unwrap(),
            },
            0,
        ));
        let mut members = vec![a, b, stale];
        termination_order(&mut members, 1);
        assert_eq!(ids(&members), vec!["i-c", "i-a", "i-b"]);
    }
}
