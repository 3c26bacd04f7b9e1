//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the fleet
//! controller. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::controller::capacity::CapacitySpec;
use crate::health::state::Thresholds;
use crate::load_balancer::Balancing;
use crate::observability::LogFormat;
use crate::provision::{LaunchTemplate, NetworkPolicy};
use crate::routing::{FixedResponse, PathPattern, RoutingRule, RuleAction};
use crate::state::object_store::BucketSettings;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// Fleet identity and target group.
    pub fleet: FleetSection,

    /// Initial capacity bounds. Only used to bootstrap an empty state store.
    pub capacity: CapacitySpec,

    /// What to launch.
    pub launch_template: LaunchTemplate,

    /// Compute provisioning collaborator.
    pub provisioner: ProvisionerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Data-plane listener and rules.
    pub routing: RoutingConfig,

    /// Reconciliation loop tuning.
    pub controller: ControllerConfig,

    /// Durable state backend.
    pub state: StateConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,
}

/// Fleet identity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetSection {
    /// Fleet identifier; also the lock key and state object key suffix.
    pub id: String,

    /// Target group the fleet registers into.
    pub target_group: String,
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            id: "web".to_string(),
            target_group: "web".to_string(),
        }
    }
}

/// Provisioner configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Worker addresses handed out by the static pool provisioner.
    pub pool: Vec<String>,
}

/// Health check protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeProtocol {
    #[default]
    Http,
    Tcp,
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub protocol: ProbeProtocol,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Status codes counted as success, e.g. "200" or "200-299,302".
    pub matcher: String,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            protocol: ProbeProtocol::Http,
            path: "/health".to_string(),
            matcher: "200".to_string(),
            interval_secs: 10,
            timeout_secs: 5,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            healthy: self.healthy_threshold,
            unhealthy: self.unhealthy_threshold,
        }
    }
}

/// Data-plane listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    pub balancing: Balancing,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,

    /// Listener rules in any order; validated as a set.
    pub rules: Vec<RoutingRule>,

    /// Permission set of the listener. Only ingress is evaluated.
    pub ingress: NetworkPolicy,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            balancing: Balancing::RoundRobin,
            request_timeout_secs: 30,
            rules: vec![
                RoutingRule {
                    priority: 100,
                    path: PathPattern::catch_all(),
                    host: None,
                    action: RuleAction::Forward {
                        target_group: FleetSection::default().target_group,
                    },
                },
                RoutingRule {
                    priority: u32::MAX,
                    path: PathPattern::catch_all(),
                    host: None,
                    action: RuleAction::FixedResponse(FixedResponse::not_found()),
                },
            ],
            ingress: NetworkPolicy::open_tcp(8080),
        }
    }
}

/// Reconciliation loop configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds between reconcile cycles.
    pub interval_secs: u64,

    /// Fleet lock lease in seconds.
    pub lock_lease_secs: u64,

    /// Launch/terminate attempts before the cycle fails.
    pub launch_max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub backoff_max_ms: u64,

    /// Seconds a launched instance has to report ready.
    pub ready_timeout_secs: u64,

    /// Seconds to wait for in-flight requests before forcing termination.
    pub drain_timeout_secs: u64,

    /// Seconds a member gets to pass health checks before it may be replaced.
    pub health_check_grace_secs: u64,

    /// Replace members that stay unhealthy past the grace period.
    pub replace_unhealthy: bool,

    /// Replacements started per cycle.
    pub max_surge: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            lock_lease_secs: 60,
            launch_max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            ready_timeout_secs: 120,
            drain_timeout_secs: 30,
            health_check_grace_secs: 300,
            replace_unhealthy: true,
            max_surge: 1,
        }
    }
}

impl ControllerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn health_check_grace(&self) -> Duration {
        Duration::from_secs(self.health_check_grace_secs)
    }
}

/// State store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    Memory,
    #[default]
    File,
}

/// Durable state configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,

    /// Root directory of the file backend.
    pub path: PathBuf,

    /// Principal presented to the store. `None` means anonymous, which is refused.
    pub principal: Option<String>,

    pub bucket: BucketSettings,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            path: PathBuf::from("./fleet-state"),
            principal: Some("fleet-controller".to_string()),
            bucket: BucketSettings::default(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. "info" or "fleet_controller=debug").
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: crate::observability::logging::DEFAULT_FILTER.to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
