//! Provisioner over a fixed pool of pre-existing hosts.
//!
//! "Launching" claims a free address from the pool; terminating returns it.
//! Readiness is a TCP connect to the claimed address.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::fleet::MemberId;
use crate::provision::{Instance, LaunchTemplate, ProvisionError, Provisioner};

const READY_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct StaticPoolProvisioner {
    addresses: Vec<SocketAddr>,
    claimed: Mutex<HashMap<MemberId, SocketAddr>>,
}

impl StaticPoolProvisioner {
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self {
            addresses,
            claimed: Mutex::new(HashMap::new()),
        }
    }

    /// Number of unclaimed hosts.
    pub fn available(&self) -> usize {
        let claimed = self.claimed.lock().expect("pool mutex poisoned");
        self.addresses.len() - claimed.len()
    }

    fn address_of(&self, id: &MemberId) -> Option<SocketAddr> {
        self.claimed
            .lock()
            .expect("pool mutex poisoned")
            .get(id)
            .copied()
    }
}

#[async_trait]
impl Provisioner for StaticPoolProvisioner {
    async fn launch(&self, template: &LaunchTemplate) -> Result<Instance, ProvisionError> {
        let mut claimed = self.claimed.lock().expect("pool mutex poisoned");
        let free = self
            .addresses
            .iter()
            .find(|addr| !claimed.values().any(|c| c == *addr))
            .copied()
            .ok_or(ProvisionError::CapacityExhausted)?;

        let id = MemberId::new(format!("i-{}", &Uuid::new_v4().simple().to_string()[..17]));
        claimed.insert(id.clone(), free);

        tracing::info!(
            member = %id,
            address = %free,
            image = %template.image,
            instance_type = %template.instance_type,
            "Claimed pool host"
        );
        Ok(Instance { id, address: free })
    }

    async fn terminate(&self, id: &MemberId) -> Result<(), ProvisionError> {
        let released = self.claimed.lock().expect("pool mutex poisoned").remove(id);
        match released {
            Some(addr) => tracing::info!(member = %id, address = %addr, "Released pool host"),
            None => tracing::debug!(member = %id, "Terminate for unknown member ignored"),
        }
        Ok(())
    }

    async fn is_ready(&self, id: &MemberId) -> Result<bool, ProvisionError> {
        let addr = self
            .address_of(id)
            .ok_or_else(|| ProvisionError::UnknownInstance(id.clone()))?;
        let ready = matches!(
            tokio::time::timeout(READY_CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        );
        Ok(ready)
    }
}
