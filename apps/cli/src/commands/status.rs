//! `wikisync status`: summary of the saved state and the backup catalog.
//! Works without a running engine; a running daemon saves its state after
//! every batch.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use super::print_json;
use wikisync_core::StateSnapshot;
use wikisync_db::{store::CATALOG_FILE, BackupStore};
use wikisync_engine::{JsonStateFile, StateStorage, SyncConfig};

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub documents: usize,
    pub diverged: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub remote_cursor: Option<DateTime<Utc>>,
}

impl StateSummary {
    pub fn of(state: &StateSnapshot) -> Self {
        let records = state.records.values();
        StateSummary {
            documents: records.clone().filter(|r| !r.is_tombstone()).count(),
            diverged: records.clone().filter(|r| !r.is_converged()).count(),
            deleted: records.filter(|r| r.is_tombstone()).count(),
            conflicts: state.conflicts.len(),
            last_sync_time: state.last_sync_at,
            remote_cursor: state.remote_cursor,
        }
    }
}

/// What `status` knows about the backup catalog.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub backups: u64,
    pub reachable: bool,
    pub migrations_applied: usize,
    pub migrations_known: usize,
}

impl CatalogSummary {
    /// Reads an existing catalog. Returns `None` when no backup was ever
    /// taken in `dir`.
    pub async fn read(dir: &Path) -> anyhow::Result<Option<Self>> {
        if !dir.join(CATALOG_FILE).exists() {
            return Ok(None);
        }
        let store = BackupStore::open(dir)
            .await
            .with_context(|| format!("failed to open backup catalog in {}", dir.display()))?;
        let health = store.health().await?;
        let backups = store.count().await?;
        store.close().await;

        Ok(Some(CatalogSummary {
            backups,
            reachable: health.reachable,
            migrations_applied: health.migrations_applied,
            migrations_known: health.migrations_known,
        }))
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    state: StateSummary,
    catalog: Option<CatalogSummary>,
}

pub async fn execute(config: SyncConfig, json: bool) -> anyhow::Result<()> {
    let path = config
        .engine
        .state_path
        .context("engine.state_path is not set")?;
    let state = JsonStateFile::new(&path)
        .load()
        .await
        .with_context(|| format!("failed to read {}", path.display()))?
        .unwrap_or_default();

    let summary = StateSummary::of(&state);
    let catalog = match &config.backup.dir {
        Some(dir) => CatalogSummary::read(dir).await?,
        None => None,
    };
    if json {
        return print_json(&StatusReport {
            state: summary,
            catalog,
        });
    }

    let when = |t: Option<DateTime<Utc>>| t.map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
    println!("state file:      {}", path.display());
    println!("documents:       {}", summary.documents);
    println!("diverged:        {}", summary.diverged);
    println!("deleted:         {}", summary.deleted);
    println!("conflicts:       {}", summary.conflicts);
    println!("last sync:       {}", when(summary.last_sync_time));
    println!("remote cursor:   {}", when(summary.remote_cursor));
    match catalog {
        Some(catalog) => {
            println!("backups:         {}", catalog.backups);
            println!(
                "catalog:         {} (migrations {}/{})",
                if catalog.reachable { "ok" } else { "unreachable" },
                catalog.migrations_applied,
                catalog.migrations_known
            );
        }
        None => println!("backups:         none taken yet"),
    }
    Ok(())
}
