//! `wikisync run`: keep both sides in sync until interrupted.

use anyhow::Context;
use tracing::{error, info};

use wikisync_engine::{SyncConfig, SyncEngine};

pub async fn execute(config: SyncConfig) -> anyhow::Result<()> {
    let mut engine = SyncEngine::builder(config).build();
    engine.start().await.context("failed to start sync engine")?;

    let config = engine.config();
    info!(
        root = ?config.local.root,
        watch = config.local.watch,
        poll_interval_ms = config.remote.poll_interval_ms,
        "Syncing; press Ctrl+C to stop"
    );

    shutdown_signal().await;

    engine.stop().await.context("failed to stop sync engine")?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping sync engine...");
}
