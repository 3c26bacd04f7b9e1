//! Capacity controller.
//!
//! # Data Flow
//! ```text
//! worker.rs (interval tick or wake)
//!     → reconciler.rs reconcile_once
//!         → acquire fleet lock (skip cycle if held)
//!         → sync latest FleetRecord from the versioned state store
//!         → scale out / scale in / replace through the provisioner
//!         → register / deregister with the target registry
//!     → release lock
//!
//! operator.rs (admin API, fleetctl)
//!     → set_desired_capacity / rollback_capacity
//!         → same fleet lock, fencing check, append new record version
//!         → wake worker
//! ```
//!
//! # Design Decisions
//! - One lock serializes cycles and desired-state writes for a fleet
//! - Records carry the writer's fencing token; a lease older than the
//!   latest record cannot append
//! - Members are registered only after the provisioner reports ready

pub mod capacity;
pub mod operator;
pub mod reconciler;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use capacity::{CapacityError, CapacitySpec, FleetRecord};
pub use operator::{CapacityVersion, FleetStatus, MemberView};
pub use reconciler::{
    recorded_fencing_token, termination_order, CapacityController, ControllerError,
    ControllerParts, ControllerResult, CurrentRecord, CycleReport, ReconcilePhase,
    TemplateRevision,
};
pub use worker::ControllerWorker;
