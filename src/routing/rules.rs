//! Listener rules and rule-set validation.
//!
//! # Invariants
//! - Priorities are unique per listener; lower evaluates first
//! - Exactly one default rule: catch-all path, no host condition,
//!   fixed-response action, and the highest priority value

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::routing::matcher::{HostPattern, PathPattern, RouteRequest};

/// Rule-set validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("invalid pattern {0:?}")]
    InvalidPattern(String),

    #[error("duplicate rule priority {0}")]
    DuplicatePriority(u32),

    #[error("listener has no default fixed-response catch-all rule")]
    MissingDefault,

    #[error("listener has more than one default rule")]
    MultipleDefaults,

    #[error("default rule priority {0} is not the last evaluated")]
    DefaultNotLast(u32),

    #[error("rule {priority} forwards to unknown target group {group:?}")]
    UnknownTargetGroup { priority: u32, group: String },

    #[error("rule {priority} has invalid status code {status}")]
    InvalidStatus { priority: u32, status: u16 },
}

/// A static response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedResponse {
    pub status: u16,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub body: String,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

impl FixedResponse {
    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: default_content_type(),
            body: "Not Found".to_string(),
        }
    }
}

/// What a matched rule does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Forward { target_group: String },
    FixedResponse(FixedResponse),
}

/// One listener rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub priority: u32,
    pub path: PathPattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostPattern>,
    pub action: RuleAction,
}

impl RoutingRule {
    pub fn forward(priority: u32, path: &str, target_group: &str) -> Result<Self, RuleError> {
        Ok(Self {
            priority,
            path: PathPattern::new(path)?,
            host: None,
            action: RuleAction::Forward {
                target_group: target_group.to_string(),
            },
        })
    }

    pub fn fixed(priority: u32, path: &str, response: FixedResponse) -> Result<Self, RuleError> {
        Ok(Self {
            priority,
            path: PathPattern::new(path)?,
            host: None,
            action: RuleAction::FixedResponse(response),
        })
    }

    /// Catch-all fixed-response rule.
    pub fn is_default(&self) -> bool {
        self.path.is_catch_all()
            && self.host.is_none()
            && matches!(self.action, RuleAction::FixedResponse(_))
    }

    pub fn matches(&self, req: &RouteRequest<'_>) -> bool {
        let host_ok = match (&self.host, req.host) {
            (None, _) => true,
            (Some(pattern), Some(host)) => pattern.matches(host),
            (Some(_), None) => false,
        };
        host_ok && self.path.matches(req.path)
    }
}

/// Validated, priority-ordered rules of one listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<RoutingRule>,
}

impl RuleSet {
    /// Validate and sort. `groups` are the target groups forwards may name.
    pub fn new(mut rules: Vec<RoutingRule>, groups: &[&str]) -> Result<Self, RuleError> {
        rules.sort_by_key(|r| r.priority);

        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.priority) {
                return Err(RuleError::DuplicatePriority(rule.priority));
            }
            match &rule.action {
                RuleAction::Forward { target_group } if !groups.contains(&target_group.as_str()) => {
                    return Err(RuleError::UnknownTargetGroup {
                        priority: rule.priority,
                        group: target_group.clone(),
                    });
                }
                RuleAction::FixedResponse(resp) if !(100..=599).contains(&resp.status) => {
                    return Err(RuleError::InvalidStatus {
                        priority: rule.priority,
                        status: resp.status,
                    });
                }
                _ => {}
            }
        }

        let defaults: Vec<&RoutingRule> = rules.iter().filter(|r| r.is_default()).collect();
        match defaults.as_slice() {
            [] => return Err(RuleError::MissingDefault),
            [only] => {
                let last = rules.last().map(|r| r.priority);
                if last != Some(only.priority) {
                    return Err(RuleError::DefaultNotLast(only.priority));
                }
            }
            _ => return Err(RuleError::MultipleDefaults),
        }

        Ok(Self { rules })
    }

    /// First matching rule in priority order. The default rule guarantees a match.
    pub fn first_match(&self, req: &RouteRequest<'_>) -> &RoutingRule {
        self.rules
            .iter()
            .find(|r| r.matches(req))
            .unwrap_or_else(|| self.default_rule())
    }

    pub fn default_rule(&self) -> &RoutingRule {
        // validated in new(): last rule is the default
        &self.rules[self.rules.len() - 1]
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }
}
