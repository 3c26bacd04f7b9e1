//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (rules reference the fleet's target group)
//! - Validate value ranges (timeouts > 0, thresholds >= 1, addresses parse)
//! - Refuse unsafe state-store settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FleetConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{FleetConfig, ProbeProtocol};
use crate::health::probe::StatusMatcher;
use crate::routing::RuleSet;

/// One semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &FleetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_fleet(config, &mut errors);
    validate_health(config, &mut errors);
    validate_routing(config, &mut errors);
    validate_controller(config, &mut errors);
    validate_state(config, &mut errors);
    validate_surfaces(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("{:?} is not a socket address", value),
        ));
    }
}

fn validate_fleet(config: &FleetConfig, errors: &mut Vec<ValidationError>) {
    let id = &config.fleet.id;
    let id_ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !id_ok {
        errors.push(ValidationError::new(
            "fleet.id",
            "must be non-empty and contain only [A-Za-z0-9_-]",
        ));
    }
    if config.fleet.target_group.is_empty() {
        errors.push(ValidationError::new("fleet.target_group", "must not be empty"));
    }

    if let Err(e) = config.capacity.validate() {
        errors.push(ValidationError::new("capacity", e.to_string()));
    }

    for (i, addr) in config.provisioner.pool.iter().enumerate() {
        check_addr(&format!("provisioner.pool[{}]", i), addr, errors);
    }
}

fn validate_health(config: &FleetConfig, errors: &mut Vec<ValidationError>) {
    let hc = &config.health_check;
    if hc.healthy_threshold == 0 {
        errors.push(ValidationError::new("health_check.healthy_threshold", "must be >= 1"));
    }
    if hc.unhealthy_threshold == 0 {
        errors.push(ValidationError::new("health_check.unhealthy_threshold", "must be >= 1"));
    }
    if hc.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
    }
    if hc.timeout_secs == 0 {
        errors.push(ValidationError::new("health_check.timeout_secs", "must be > 0"));
    } else if hc.timeout_secs >= hc.interval_secs {
        errors.push(ValidationError::new(
            "health_check.timeout_secs",
            "must be shorter than interval_secs",
        ));
    }
    if hc.protocol == ProbeProtocol::Http {
        if !hc.path.starts_with('/') {
            errors.push(ValidationError::new("health_check.path", "must start with '/'"));
        }
        if let Err(e) = hc.matcher.parse::<StatusMatcher>() {
            errors.push(ValidationError::new("health_check.matcher", e.to_string()));
        }
    }
}

fn validate_routing(config: &FleetConfig, errors: &mut Vec<ValidationError>) {
    let routing = &config.routing;
    check_addr("routing.bind_address", &routing.bind_address, errors);
    if routing.request_timeout_secs == 0 {
        errors.push(ValidationError::new("routing.request_timeout_secs", "must be > 0"));
    }
    let groups = [config.fleet.target_group.as_str()];
    if let Err(e) = RuleSet::new(routing.rules.clone(), &groups) {
        errors.push(ValidationError::new("routing.rules", e.to_string()));
    }
    for (i, rule) in routing.ingress.ingress.iter().enumerate() {
        if rule.from_port > rule.to_port {
            errors.push(ValidationError::new(
                &format!("routing.ingress.ingress[{}]", i),
                "from_port is greater than to_port",
            ));
        }
    }
}

const MIN_LOCK_LEASE_SECS: u64 = 3;

fn validate_controller(config: &FleetConfig, errors: &mut Vec<ValidationError>) {
    let c = &config.controller;
    let positive = [
        ("controller.interval_secs", c.interval_secs),
        ("controller.lock_lease_secs", c.lock_lease_secs),
        ("controller.ready_timeout_secs", c.ready_timeout_secs),
        ("controller.drain_timeout_secs", c.drain_timeout_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    // renewed every third of the lease while a cycle runs
    if (1..MIN_LOCK_LEASE_SECS).contains(&c.lock_lease_secs) {
        errors.push(ValidationError::new(
            "controller.lock_lease_secs",
            format!("must be >= {} so it can be renewed mid-cycle", MIN_LOCK_LEASE_SECS),
        ));
    }
    if c.launch_max_attempts == 0 {
        errors.push(ValidationError::new("controller.launch_max_attempts", "must be >= 1"));
    }
    if c.max_surge == 0 {
        errors.push(ValidationError::new("controller.max_surge", "must be >= 1"));
    }
    if c.backoff_base_ms > c.backoff_max_ms {
        errors.push(ValidationError::new(
            "controller.backoff_base_ms",
            "must not exceed backoff_max_ms",
        ));
    }
}

fn validate_state(config: &FleetConfig, errors: &mut Vec<ValidationError>) {
    for violation in config.state.bucket.violations() {
        errors.push(ValidationError::new("state.bucket", violation));
    }
    match config.state.principal.as_deref() {
        None => errors.push(ValidationError::new(
            "state.principal",
            "anonymous access to the state store is refused",
        )),
        Some("") => errors.push(ValidationError::new("state.principal", "must not be empty")),
        Some(_) => {}
    }
}

fn validate_surfaces(config: &FleetConfig, errors: &mut Vec<ValidationError>) {
    if config.admin.enabled {
        check_addr("admin.bind_address", &config.admin.bind_address, errors);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }
    if config.observability.metrics_enabled {
        check_addr(
            "observability.metrics_address",
            &config.observability.metrics_address,
            errors,
        );
    }
}
