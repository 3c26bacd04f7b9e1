//! Shared utilities for integration testing.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use fleet_controller::config::{ControllerConfig, HealthCheckConfig};
use fleet_controller::controller::{CapacityController, CapacitySpec, ControllerParts};
use fleet_controller::fleet::{FleetMember, MemberId};
use fleet_controller::health::{HealthChecker, Probe, ProbeError};
use fleet_controller::lock::{DistributedLock, MemoryLockTable};
use fleet_controller::provision::{Instance, LaunchTemplate, ProvisionError, Provisioner};
use fleet_controller::registry::TargetRegistry;
use fleet_controller::state::{
    BucketSettings, Credentials, MemoryObjectStore, ObjectStore, VersionedStateStore,
};

async fn read_request_head(socket: &mut TcpStream) {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 512];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Start a mock member on an ephemeral port that answers every path,
/// `/health` included, with 200 and `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// Start a mock member whose status and body come from `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        read_request_head(&mut socket).await;
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Poll `cond` every 50ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

/// Fresh directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Provisioner with sequential ids and scriptable failures.
#[derive(Debug)]
pub struct ScriptedProvisioner {
    next: AtomicU32,
    pub failing_launches: AtomicU32,
    pub ready: AtomicBool,
    pub terminated: Mutex<Vec<MemberId>>,
}

impl Default for ScriptedProvisioner {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(0),
            failing_launches: AtomicU32::new(0),
            ready: AtomicBool::new(true),
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
            return Err(ProvisionError::Provider("quota exceeded".to_string()));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Instance {
            id: MemberId::new(format!("i-{}", n)),
            address: format!("127.0.0.1:{}", 20_000 + n).parse().unwrap(),
        })
    }

    async fn terminate(&self, id: &MemberId) -> Result<(), ProvisionError> {
        self.terminated.lock().unwrap().push(id.clone());
        Ok(())
    }

    async fn is_ready(&self, _id: &MemberId) -> Result<bool, ProvisionError> {
        Ok(self.ready.load(Ordering::SeqCst))
    }
}

/// Probe that fails for members listed in `failing`.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    pub failing: Mutex<HashSet<MemberId>>,
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

pub fn memory_store() -> VersionedStateStore {
    store_over(Arc::new(MemoryObjectStore::new(BucketSettings::default())))
}

pub fn store_over(backend: Arc<dyn ObjectStore>) -> VersionedStateStore {
    VersionedStateStore::open(
        backend,
        Credentials::Principal("integration".to_string()),
        "fleets/web",
    )
    .unwrap()
}

/// Controller plus the collaborators tests poke at.
pub struct Harness {
    pub controller: Arc<CapacityController>,
    pub registry: Arc<TargetRegistry>,
    pub health: Arc<HealthChecker>,
    pub lock: DistributedLock,
}

pub fn controller_config() -> ControllerConfig {
    ControllerConfig {
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        ready_timeout_secs: 5,
        drain_timeout_secs: 2,
        ..ControllerConfig::default()
    }
}

pub fn build_controller(
    store: VersionedStateStore,
    lock: DistributedLock,
    provisioner: Arc<dyn Provisioner>,
    probe: Arc<dyn Probe>,
    capacity: CapacitySpec,
) -> Harness {
    build_controller_with(store, lock, provisioner, probe, capacity, 1)
}

/// Like `build_controller` with a chosen probe interval. A long interval
/// leaves only the probe fired at watch time, so tests step health by hand.
pub fn build_controller_with(
    store: VersionedStateStore,
    lock: DistributedLock,
    provisioner: Arc<dyn Provisioner>,
    probe: Arc<dyn Probe>,
    capacity: CapacitySpec,
    health_interval_secs: u64,
) -> Harness {
    let registry = Arc::new(TargetRegistry::new("web"));
    let health_config = HealthCheckConfig {
        interval_secs: health_interval_secs,
        timeout_secs: 1,
        ..HealthCheckConfig::default()
    };
    let health = Arc::new(HealthChecker::new(
        probe,
        &health_config,
        vec![registry.clone()],
    ));
    let controller = CapacityController::recover(ControllerParts {
        fleet_id: "web".to_string(),
        lock: lock.clone(),
        store,
        provisioner,
        registry: registry.clone(),
        health: health.clone(),
        config: controller_config(),
        template: LaunchTemplate::default(),
        bootstrap_capacity: capacity,
    })
    .unwrap();

    Harness {
        controller: Arc::new(controller),
        registry,
        health,
        lock,
    }
}

pub fn new_lock() -> DistributedLock {
    DistributedLock::new(Arc::new(MemoryLockTable::new()))
}
