//! Target registry.
//!
//! # Responsibilities
//! - Authoritative list of members registered with a target group
//! - Publish the healthy subset as an immutable snapshot
//!
//! # Design Decisions
//! - Snapshot lives in an `ArcSwap`: readers never take a lock and never
//!   block writers; writers publish with a compare-and-swap loop (`rcu`)
//! - Register/deregister are idempotent
//! - Health transitions only trigger `refresh()`; the registry never
//!   mutates member health itself

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::fleet::{FleetMember, MemberId};

/// Point-in-time view of a target group.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    registered: BTreeMap<MemberId, Arc<FleetMember>>,
    healthy: Vec<Arc<FleetMember>>,
    generation: u64,
}

impl RegistrySnapshot {
    fn rebuild(registered: BTreeMap<MemberId, Arc<FleetMember>>, generation: u64) -> Self {
        let healthy = registered
            .values()
            .filter(|m| m.health.is_healthy())
            .cloned()
            .collect();
        Self {
            registered,
            healthy,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_registered(&self, id: &MemberId) -> bool {
        self.registered.contains_key(id)
    }

    pub fn registered(&self) -> impl Iterator<Item = &Arc<FleetMember>> {
        self.registered.values()
    }
}

/// The healthy, registered members of a snapshot.
#[derive(Debug, Clone)]
pub struct HealthySet(Arc<RegistrySnapshot>);

impl HealthySet {
    pub fn members(&self) -> &[Arc<FleetMember>] {
        &self.0.healthy
    }

    pub fn len(&self) -> usize {
        self.0.healthy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.healthy.is_empty()
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.0.healthy.iter().any(|m| &m.id == id)
    }

    pub fn ids(&self) -> Vec<MemberId> {
        self.0.healthy.iter().map(|m| m.id.clone()).collect()
    }
}

/// Membership of one target group.
#[derive(Debug)]
pub struct TargetRegistry {
    group: String,
    snapshot: ArcSwap<RegistrySnapshot>,
}

impl TargetRegistry {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Register a member. Returns false if it was already registered.
    pub fn register(&self, member: Arc<FleetMember>) -> bool {
        let id = member.id.clone();
        let previous = self.snapshot.rcu(|current| {
            let mut registered = current.registered.clone();
            registered.insert(member.id.clone(), member.clone());
            RegistrySnapshot::rebuild(registered, current.generation + 1)
        });
        let added = !previous.registered.contains_key(&id);
        if added {
            tracing::info!(group = %self.group, member = %id, "Member registered");
        }
        added
    }

    /// Deregister a member. Returns the member if it was registered.
    pub fn deregister(&self, id: &MemberId) -> Option<Arc<FleetMember>> {
        let previous = self.snapshot.rcu(|current| {
            let mut registered = current.registered.clone();
            registered.remove(id);
            RegistrySnapshot::rebuild(registered, current.generation + 1)
        });
        let removed = previous.registered.get(id).cloned();
        if removed.is_some() {
            tracing::info!(group = %self.group, member = %id, "Member deregistered");
        }
        removed
    }

    /// Re-derive the healthy subset after health transitions.
    pub fn refresh(&self) {
        self.snapshot.rcu(|current| {
            RegistrySnapshot::rebuild(current.registered.clone(), current.generation + 1)
        });
    }

    /// Consistent healthy set, lock-free.
    pub fn current_healthy_set(&self) -> HealthySet {
        HealthySet(self.snapshot.load_full())
    }

    /// Full snapshot (registered members included).
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn is_registered(&self, id: &MemberId) -> bool {
        self.snapshot.load().is_registered(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::Thresholds;
    use crate::provision::Instance;

    const ONE: Thresholds = Thresholds {
        healthy: 1,
        unhealthy: 1,
    };

    fn member(id: &str, port: u16) -> Arc<FleetMember> {
        Arc::new(FleetMember::new(
            Instance {
                id: MemberId::new(id),
                address: format!("127.0.0.1:{}", port).parse().unwrap(),
            },
            1,
        ))
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = TargetRegistry::new("web");
        let m = member("i-a", 9001);
        assert!(registry.register(m.clone()));
        assert!(!registry.register(m.clone()));
        assert_eq!(registry.snapshot().registered().count(), 1);

        assert!(registry.deregister(&m.id).is_some());
        assert!(registry.deregister(&m.id).is_none());
        assert!(!registry.is_registered(&m.id));
    }

    #[test]
    fn test_only_healthy_registered_members_are_eligible() {
        let registry = TargetRegistry::new("web");
        let a = member("i-a", 9001);
        let b = member("i-b", 9002);
        let unregistered = member("i-c", 9003);

        registry.register(a.clone());
        registry.register(b.clone());
        assert!(registry.current_healthy_set().is_empty());

        a.health.record_success(ONE);
        unregistered.health.record_success(ONE);
        registry.refresh();

        let set = registry.current_healthy_set();
        assert_eq!(set.ids(), vec![a.id.clone()]);
        assert!(!set.contains(&unregistered.id));

        // deregistering a healthy member removes it from the set
        registry.deregister(&a.id);
        assert!(registry.current_healthy_set().is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_while_writers_proceed() {
        let registry = TargetRegistry::new("web");
        let a = member("i-a", 9001);
        a.health.record_success(ONE);
        registry.register(a.clone());

        let held = registry.current_healthy_set();
        registry.deregister(&a.id);

        assert_eq!(held.len(), 1);
        assert!(registry.current_healthy_set().is_empty());
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = TargetRegistry::new("web");
        std::thread::scope(|s| {
            for t in 0..8u16 {
                let registry = &registry;
                s.spawn(move || {
                    for i in 0..25u16 {
                        registry.register(member(&format!("i-{}-{}", t, i), 10_000 + t * 100 + i));
                    }
                });
            }
        });
        let snap = registry.snapshot();
        assert_eq!(snap.registered().count(), 200);
        assert!(snap.generation() >= 200);
    }
}
