//! Traffic router.
//!
//! # Responsibilities
//! - Evaluate listener rules in priority order
//! - Pick a member from the target group's healthy snapshot
//! - Return the default fixed response when nothing else matches
//!
//! # Design Decisions
//! - Hot path is lock-free: rules and registry snapshots are `ArcSwap` loads
//! - Rules can be swapped at runtime; invalid rule sets are rejected and the
//!   live set stays in place
//! - An empty healthy set is an explicit `NoHealthyTargets`, never a
//!   forward to a known-bad member

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::fleet::FleetMember;
use crate::load_balancer::{Balancing, LoadBalancer};
use crate::registry::TargetRegistry;
use crate::routing::matcher::RouteRequest;
use crate::routing::rules::{FixedResponse, RoutingRule, RuleAction, RuleError, RuleSet};

/// Routing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no healthy targets in group {group}")]
    NoHealthyTargets { group: String },

    #[error("target group {0} is not attached to this router")]
    UnknownTargetGroup(String),
}

/// Outcome of routing a request.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    Forward {
        priority: u32,
        group: String,
        member: Arc<FleetMember>,
    },
    Fixed {
        priority: u32,
        response: FixedResponse,
    },
}

#[derive(Debug)]
struct TargetGroup {
    registry: Arc<TargetRegistry>,
    balancer: Box<dyn LoadBalancer>,
}

/// Listener router.
#[derive(Debug)]
pub struct TrafficRouter {
    rules: ArcSwap<RuleSet>,
    groups: HashMap<String, TargetGroup>,
}

impl TrafficRouter {
    /// Build a router over `groups` with an initial rule set.
    pub fn new(
        groups: Vec<(Arc<TargetRegistry>, Balancing)>,
        rules: Vec<RoutingRule>,
    ) -> Result<Self, RuleError> {
        let groups: HashMap<String, TargetGroup> = groups
            .into_iter()
            .map(|(registry, balancing)| {
                (
                    registry.group().to_string(),
                    TargetGroup {
                        registry,
                        balancer: balancing.build(),
                    },
                )
            })
            .collect();

        let names: Vec<&str> = groups.keys().map(String::as_str).collect();
        let rules = RuleSet::new(rules, &names)?;

        Ok(Self {
            rules: ArcSwap::from_pointee(rules),
            groups,
        })
    }

    /// Route a request.
    pub fn route(&self, req: &RouteRequest<'_>) -> Result<RouteDecision, RouteError> {
        let rules = self.rules.load();
        let rule = rules.first_match(req);

        match &rule.action {
            RuleAction::FixedResponse(response) => Ok(RouteDecision::Fixed {
                priority: rule.priority,
                response: response.clone(),
            }),
            RuleAction::Forward { target_group } => {
                let group = self
                    .groups
                    .get(target_group)
                    .ok_or_else(|| RouteError::UnknownTargetGroup(target_group.clone()))?;

                let healthy = group.registry.current_healthy_set();
                let member = group.balancer.next_member(healthy.members()).ok_or_else(|| {
                    RouteError::NoHealthyTargets {
                        group: target_group.clone(),
                    }
                })?;

                Ok(RouteDecision::Forward {
                    priority: rule.priority,
                    group: target_group.clone(),
                    member,
                })
            }
        }
    }

    /// Replace the rule set atomically.
    pub fn update_rules(&self, rules: Vec<RoutingRule>) -> Result<(), RuleError> {
        let names: Vec<&str> = self.groups.keys().map(String::as_str).collect();
        let set = RuleSet::new(rules, &names)?;
        tracing::info!(rule_count = set.rules().len(), "Routing rules updated");
        self.rules.store(Arc::new(set));
        Ok(())
    }

    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }

    pub fn registry(&self, group: &str) -> Option<&Arc<TargetRegistry>> {
        self.groups.get(group).map(|g| &g.registry)
    }
}
