//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Translate the first one into a graceful shutdown broadcast
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second signal while draining exits immediately

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// Resolves on SIGINT or (on unix) SIGTERM.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
            _ = term.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "SIGINT")
    }
}

/// Trigger `shutdown` on the first signal; exit the process on the second.
pub fn spawn_signal_handler(shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => tracing::info!(signal = name, "Shutdown signal received"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return;
            }
        }
        shutdown.trigger();

        if let Ok(name) = wait_for_signal().await {
            tracing::warn!(signal = name, "Second signal, exiting immediately");
            std::process::exit(130);
        }
    })
}
