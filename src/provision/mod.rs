//! Compute provisioning collaborator.
//!
//! # Data Flow
//! ```text
//! controller scale-out
//!     → Provisioner::launch(template) → Instance { id, address }
//!     → Provisioner::is_ready(id) polled until ready or timeout
//!
//! controller scale-in / replacement
//!     → drain → Provisioner::terminate(id)
//! ```
//!
//! # Design Decisions
//! - The core knows nothing about images or boot scripts; the template is
//!   passed through opaquely
//! - Terminate is idempotent

pub mod network;
pub mod static_pool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::fleet::MemberId;

pub use network::{NetworkPolicy, PermissionRule, Protocol};
pub use static_pool::StaticPoolProvisioner;

/// Opaque description of what to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchTemplate {
    pub image: String,
    pub instance_type: String,
    pub user_data: Option<String>,
    /// Permission set attached to every member.
    pub network: NetworkPolicy,
}

impl Default for LaunchTemplate {
    fn default() -> Self {
        Self {
            image: "worker:latest".to_string(),
            instance_type: "small".to_string(),
            user_data: None,
            network: NetworkPolicy::default(),
        }
    }
}

/// A launched instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: MemberId,
    pub address: SocketAddr,
}

/// Provisioning errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("no capacity available to launch")]
    CapacityExhausted,

    #[error("unknown instance {0}")]
    UnknownInstance(MemberId),

    #[error("instance {0} did not become ready in time")]
    NotReady(MemberId),

    #[error("provider error: {0}")]
    Provider(String),
}

/// Launch/terminate collaborator.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn launch(&self, template: &LaunchTemplate) -> Result<Instance, ProvisionError>;

    async fn terminate(&self, id: &MemberId) -> Result<(), ProvisionError>;

    /// Readiness signal: true once the instance can serve.
    async fn is_ready(&self, id: &MemberId) -> Result<bool, ProvisionError>;
}
