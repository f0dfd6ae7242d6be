//! `wikisync sync`: one full pass over both sides.

use anyhow::{bail, Context};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

use super::print_json;
use wikisync_engine::{EngineEvent, SyncConfig, SyncEngine};

/// What one pass did.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub auto_resolved: usize,
    /// Conflicts first detected (or changed) during this pass.
    pub conflicts_queued: usize,
    /// Conflicts waiting for an operator after the pass.
    pub conflicts_pending: usize,
    pub failed: usize,
    pub poll_failed: bool,
}

impl SyncSummary {
    fn record(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::ItemSynced { from, .. } => match from {
                wikisync_core::Side::Local => self.uploaded += 1,
                wikisync_core::Side::Remote => self.downloaded += 1,
            },
            EngineEvent::ConflictResolved { automatic: true, .. } => self.auto_resolved += 1,
            EngineEvent::ConflictDetected {
                automatic: false, ..
            } => self.conflicts_queued += 1,
            EngineEvent::SyncFailed { key: Some(_), .. } => self.failed += 1,
            EngineEvent::PollFailed { .. } => self.poll_failed = true,
            _ => {}
        }
    }

    fn collect(events: &mut broadcast::Receiver<EngineEvent>) -> Self {
        let mut summary = SyncSummary::default();
        loop {
            match events.try_recv() {
                Ok(event) => summary.record(&event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Summary missed events; counts are incomplete");
                }
                Err(_) => break,
            }
        }
        summary
    }
}

pub async fn execute(mut config: SyncConfig, json: bool) -> anyhow::Result<()> {
    config.local.watch = false;
    config.remote.poll = false;

    let mut engine = SyncEngine::builder(config).build();
    let mut events = engine.subscribe();
    engine.start().await.context("failed to start sync engine")?;

    let result = engine.sync_now().await;
    engine.stop().await?;
    result.context("sync pass failed")?;

    let mut summary = SyncSummary::collect(&mut events);
    summary.conflicts_pending = engine
        .list_conflicts()
        .await
        .context("failed to read queued conflicts")?
        .len();
    if json {
        print_json(&summary)?;
    } else {
        println!(
            "uploaded {}, downloaded {}, auto-resolved {}, queued conflicts {}, failed {}",
            summary.uploaded,
            summary.downloaded,
            summary.auto_resolved,
            summary.conflicts_queued,
            summary.failed
        );
        if summary.poll_failed {
            println!("remote poll failed; remote changes were not fetched");
        }
        if summary.conflicts_pending > 0 {
            println!(
                "{} conflict(s) waiting; run `wikisync conflicts list` to review them",
                summary.conflicts_pending
            );
        }
    }

    if summary.failed > 0 {
        bail!("{} item(s) failed and will be retried on the next sync", summary.failed);
    }
    Ok(())
}
