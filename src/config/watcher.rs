//! Configuration file watcher for hot reload.
//!
//! A running controller only takes routing rules and the launch template
//! from a reload. Every other section is fixed at startup, and capacity
//! changes only through the locked operator path. Each reload is diffed
//! against the settings in effect and only the changed hot parts are sent.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::FleetConfig;
use crate::provision::LaunchTemplate;
use crate::routing::RoutingRule;

/// Hot-reloadable changes from one reload. `None` means unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReloadUpdate {
    pub rules: Option<Vec<RoutingRule>>,
    pub launch_template: Option<LaunchTemplate>,
}

impl ReloadUpdate {
    pub fn is_empty(&self) -> bool {
        self.rules.is_none() && self.launch_template.is_none()
    }
}

/// Compare a reloaded config with the one in effect.
///
/// Returns the hot-reloadable changes and the names of changed sections
/// that only take effect after a restart.
pub fn diff_reload(current: &FleetConfig, next: &FleetConfig) -> (ReloadUpdate, Vec<&'static str>) {
    let update = ReloadUpdate {
        rules: (current.routing.rules != next.routing.rules).then(|| next.routing.rules.clone()),
        launch_template: (current.launch_template != next.launch_template)
            .then(|| next.launch_template.clone()),
    };

    let (a, b) = (current, next);
    let restart_only = [
        ("fleet", a.fleet != b.fleet),
        ("capacity", a.capacity != b.capacity),
        ("provisioner", a.provisioner != b.provisioner),
        ("health_check", a.health_check != b.health_check),
        ("routing.bind_address", a.routing.bind_address != b.routing.bind_address),
        ("routing.balancing", a.routing.balancing != b.routing.balancing),
        (
            "routing.request_timeout_secs",
            a.routing.request_timeout_secs != b.routing.request_timeout_secs,
        ),
        ("routing.ingress", a.routing.ingress != b.routing.ingress),
        ("controller", a.controller != b.controller),
        ("state", a.state != b.state),
        ("admin", a.admin != b.admin),
        ("observability", a.observability != b.observability),
    ]
    .into_iter()
    .filter_map(|(section, changed)| changed.then_some(section))
    .collect();

    (update, restart_only)
}

/// Watches the configuration file and forwards hot-reloadable changes.
pub struct ConfigWatcher {
    path: PathBuf,
    current: FleetConfig,
    update_tx: mpsc::UnboundedSender<ReloadUpdate>,
}

impl ConfigWatcher {
    /// `current` is the configuration the process started with.
    ///
    /// Returns the watcher and a receiver for validated, non-empty updates.
    pub fn new(path: &Path, current: FleetConfig) -> (Self, mpsc::UnboundedReceiver<ReloadUpdate>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut current,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let next = match load_config(&path) {
                        Ok(next) => next,
                        Err(e) => {
                            tracing::error!(error = %e, "Rejected config reload, keeping current settings");
                            return;
                        }
                    };

                    let (update, restart_only) = diff_reload(&current, &next);
                    if !restart_only.is_empty() {
                        tracing::warn!(
                            sections = ?restart_only,
                            "Reloaded settings need a restart and were not applied"
                        );
                    }
                    if update.is_empty() {
                        tracing::debug!("Config reload has no hot-reloadable changes");
                        return;
                    }

                    tracing::info!(
                        rules = update.rules.is_some(),
                        launch_template = update.launch_template.is_some(),
                        "Applying config reload"
                    );
                    // only the hot parts are considered in effect
                    current.routing.rules = next.routing.rules;
                    current.launch_template = next.launch_template;
                    let _ = update_tx.send(update);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}
