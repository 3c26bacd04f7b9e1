//! Periodic reconcile loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::controller::reconciler::{CapacityController, ControllerError};

pub struct ControllerWorker {
    controller: Arc<CapacityController>,
    interval: Duration,
}

impl ControllerWorker {
    pub fn new(controller: Arc<CapacityController>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
        }
    }

    /// Reconcile on every tick and whenever the controller is woken
    /// (desired capacity or template changed) until shutdown fires.
    #[instrument(skip(self, shutdown), fields(fleet = %self.controller.fleet_id()))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting capacity controller worker"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.controller.woken() => {
                    debug!("Woken for an immediate cycle");
                }
                _ = shutdown.recv() => {
                    info!("Capacity controller worker shutting down");
                    break;
                }
            }
            self.cycle().await;
        }
    }

    async fn cycle(&self) {
        match self.controller.reconcile_once().await {
            Ok(report) => debug!(phase = report.phase.as_str(), "Cycle finished"),
            Err(ControllerError::LockUnavailable { key }) => {
                debug!(key = %key, "Another controller holds the fleet lock")
            }
            Err(e) => warn!(error = %e, "Reconcile cycle failed"),
        }
    }
}
