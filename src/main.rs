//! Fleet capacity controller.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!   operator ──fleetctl──▶│ admin API ──▶ controller (set desired)       │
//!                         │                  │                           │
//!                         │   worker tick ──▶│ reconcile under fleet lock│
//!                         │                  ├──▶ state store (versions) │
//!                         │                  ├──▶ provisioner            │
//!                         │                  └──▶ target registry        │
//!                         │                          ▲                   │
//!                         │   health checker ────────┘ (health changes)  │
//!                         │                                              │
//!   client ──────────────▶│ router ──▶ rules ──▶ healthy set ──▶ member   │
//!                         └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use fleet_controller::admin::{setup_admin_router, AdminState};
use fleet_controller::config::watcher::ConfigWatcher;
use fleet_controller::config::{load_config, FleetConfig, StateBackend};
use fleet_controller::controller::{
    recorded_fencing_token, CapacityController, ControllerParts, ControllerWorker,
};
use fleet_controller::health::{build_probe, HealthChecker};
use fleet_controller::http::HttpServer;
use fleet_controller::lifecycle::{spawn_signal_handler, Shutdown};
use fleet_controller::lock::{DistributedLock, MemoryLockTable};
use fleet_controller::observability::{init_logging, metrics};
use fleet_controller::provision::StaticPoolProvisioner;
use fleet_controller::registry::TargetRegistry;
use fleet_controller::routing::TrafficRouter;
use fleet_controller::state::{
    Credentials, FileObjectStore, MemoryObjectStore, ObjectStore, VersionedStateStore,
};

#[derive(Parser)]
#[command(name = "fleet-controller", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "fleet.toml", env = "FLEET_CONFIG")]
    config: PathBuf,
}

fn open_state_store(config: &FleetConfig) -> Result<VersionedStateStore, Box<dyn std::error::Error>> {
    let state = &config.state;
    let backend: Arc<dyn ObjectStore> = match state.backend {
        StateBackend::Memory => {
            tracing::warn!("Using in-memory state store; desired capacity is lost on restart");
            Arc::new(MemoryObjectStore::new(state.bucket.clone()))
        }
        StateBackend::File => Arc::new(FileObjectStore::open(&state.path, state.bucket.clone())?),
    };
    let credentials = match &state.principal {
        Some(principal) => Credentials::Principal(principal.clone()),
        None => Credentials::Anonymous,
    };
    Ok(VersionedStateStore::open(
        backend,
        credentials,
        format!("fleets/{}", config.fleet.id),
    )?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    init_logging(
        &config.observability.log_level,
        config.observability.log_format,
    );
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        fleet = %config.fleet.id,
        "fleet-controller starting"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    // durable state first: the lock table must never hand out a fencing
    // token at or below one already recorded
    let store = open_state_store(&config)?;
    let floor = recorded_fencing_token(&store)?;
    let lock = DistributedLock::new(Arc::new(MemoryLockTable::with_fencing_floor(floor)));

    let registry = Arc::new(TargetRegistry::new(config.fleet.target_group.clone()));
    let router = Arc::new(TrafficRouter::new(
        vec![(registry.clone(), config.routing.balancing)],
        config.routing.rules.clone(),
    )?);

    let probe = build_probe(&config.health_check)?;
    let health = Arc::new(HealthChecker::new(
        probe,
        &config.health_check,
        vec![registry.clone()],
    ));

    let pool = config
        .provisioner
        .pool
        .iter()
        .map(|a| a.parse::<SocketAddr>())
        .collect::<Result<Vec<_>, _>>()?;
    let provisioner = Arc::new(StaticPoolProvisioner::new(pool));

    let controller = Arc::new(CapacityController::recover(ControllerParts {
        fleet_id: config.fleet.id.clone(),
        lock,
        store,
        provisioner,
        registry: registry.clone(),
        health: health.clone(),
        config: config.controller.clone(),
        template: config.launch_template.clone(),
        bootstrap_capacity: config.capacity,
    })?);

    let shutdown = Arc::new(Shutdown::new());
    let mut tasks = Vec::new();

    let worker = ControllerWorker::new(controller.clone(), config.controller.interval());
    tasks.push(tokio::spawn(worker.run(shutdown.subscribe())));

    // hot reload: rules and launch template only
    let (watcher, mut updates) = ConfigWatcher::new(&args.config, config.clone());
    let _watcher_guard = match watcher.run() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };
    {
        let router = router.clone();
        let controller = controller.clone();
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(update) = updates.recv() => {
                        if let Some(rules) = update.rules {
                            if let Err(e) = router.update_rules(rules) {
                                tracing::error!(error = %e, "Rejected reloaded routing rules");
                            }
                        }
                        if let Some(template) = update.launch_template {
                            controller.update_launch_template(template);
                        }
                    }
                    _ = stop.recv() => break,
                }
            }
        }));
    }

    if config.admin.enabled {
        let admin = setup_admin_router(AdminState {
            controller: controller.clone(),
            router: router.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        });
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, admin)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
    }

    spawn_signal_handler(shutdown.clone());

    let listener = TcpListener::bind(&config.routing.bind_address).await?;
    let server = HttpServer::new(router, config.routing.clone());
    server.run(listener, shutdown.subscribe()).await?;

    for task in tasks {
        let _ = task.await;
    }
    health.stop();
    tracing::info!("Shutdown complete");
    Ok(())
}
