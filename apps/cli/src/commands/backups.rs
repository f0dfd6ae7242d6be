//! `wikisync backups`: catalog listing, retention, verification and restore.

use anyhow::{bail, Context};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::print_json;
use wikisync_core::{Backup, SyncKey};
use wikisync_db::BackupStore;
use wikisync_engine::{SyncConfig, SyncEngine};

pub async fn list(config: SyncConfig, key: Option<&str>, json: bool) -> anyhow::Result<()> {
    let dir = config.backup.dir.context("backup.dir is not set")?;
    let store = BackupStore::open(&dir)
        .await
        .with_context(|| format!("failed to open backup catalog in {}", dir.display()))?;

    let mut backups = match key {
        Some(key) => store.list(&SyncKey::new(key)?).await?,
        None => store.list_all().await?,
    };
    store.close().await;
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if json {
        return print_json(&backups);
    }
    if backups.is_empty() {
        println!("no backups");
        return Ok(());
    }
    for backup in &backups {
        println!("{}", describe(backup));
    }
    Ok(())
}

pub async fn sweep(config: SyncConfig, json: bool) -> anyhow::Result<()> {
    let retention_days = config.backup.retention_days;
    let mut engine = SyncEngine::builder(config).build();
    let report = engine.sweep_backups().await.context("retention sweep failed")?;

    if json {
        return print_json(&serde_json::json!({
            "deleted": report.deleted,
            "kept": report.kept,
            "failed": report.failed,
            "retention_days": retention_days,
        }));
    }
    println!(
        "deleted {} backup(s) older than {} days, kept {} newest-per-key, {} failed",
        report.deleted, retention_days, report.kept, report.failed
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct VerifyOutcome {
    id: Uuid,
    key: Option<SyncKey>,
    ok: bool,
    error: Option<String>,
}

/// Verifies one backup, or every backup in the catalog.
pub async fn verify(config: SyncConfig, id: Option<Uuid>, json: bool) -> anyhow::Result<()> {
    let ids = match id {
        Some(id) => vec![(id, None)],
        None => {
            let dir = config.backup.dir.clone().context("backup.dir is not set")?;
            let store = BackupStore::open(&dir).await?;
            let all = store.list_all().await?;
            store.close().await;
            all.into_iter().map(|b| (b.id, Some(b.key))).collect()
        }
    };

    let mut engine = SyncEngine::builder(config).build();
    let mut outcomes = Vec::with_capacity(ids.len());
    for (id, key) in ids {
        let outcome = match engine.verify_backup(id).await {
            Ok(backup) => VerifyOutcome {
                id,
                key: Some(backup.key),
                ok: true,
                error: None,
            },
            Err(e) => {
                warn!(%id, error = %e, "Backup failed verification");
                VerifyOutcome {
                    id,
                    key,
                    ok: false,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    if json {
        print_json(&outcomes)?;
    } else {
        for outcome in &outcomes {
            match &outcome.error {
                None => println!("ok      {}", outcome.id),
                Some(error) => println!("FAILED  {}  {}", outcome.id, error),
            }
        }
        println!("{} backup(s) checked", outcomes.len());
    }

    let failed = outcomes.iter().filter(|o| !o.ok).count();
    if failed > 0 {
        bail!("{} backup(s) failed verification", failed);
    }
    Ok(())
}

/// Restores a backup. With `sync` set the restored content is synced to
/// the other side before returning.
pub async fn restore(mut config: SyncConfig, id: Uuid, sync: bool) -> anyhow::Result<()> {
    config.local.watch = false;
    config.remote.poll = false;

    let mut engine = SyncEngine::builder(config).build();
    let backup = engine
        .restore_backup(id)
        .await
        .with_context(|| format!("failed to restore backup {}", id))?;

    if sync {
        engine.start().await.context("failed to start sync engine")?;
        let result = engine.sync_now().await;
        engine.stop().await?;
        result.context("sync after restore failed")?;
    }

    info!(%id, key = %backup.key, side = %backup.side, synced = sync, "Backup restored");
    println!("restored {} onto {} {}", id, backup.side, backup.key);
    Ok(())
}

fn describe(backup: &Backup) -> String {
    format!(
        "{}  {}  {:<6} {:<19} {:>8} B  {}  {}",
        backup.id,
        backup.created_at.format("%Y-%m-%d %H:%M:%S"),
        backup.side.to_string(),
        backup.reason.to_string(),
        backup.size,
        backup.content_ref.short(),
        backup.key,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikisync_core::{BackupReason, Side};

    #[tokio::test]
    async fn test_list_and_sweep_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::for_directory(dir.path());

        list(config.clone(), None, false).await.unwrap();
        list(config.clone(), Some("notes/a.md"), true).await.unwrap();
        sweep(config, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_and_restore_local_backup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let config = SyncConfig::for_directory(dir.path());
        let key = SyncKey::new("notes/a.md").unwrap();

        let store = BackupStore::open(config.backup.dir.clone().unwrap()).await.unwrap();
        let backup = store
            .store(&key, Side::Local, BackupReason::RoutineSync, b"before")
            .await
            .unwrap();
        store.close().await;

        std::fs::create_dir_all(dir.path().join("docs/notes")).unwrap();
        std::fs::write(dir.path().join("docs/notes/a.md"), "after").unwrap();

        verify(config.clone(), None, false).await.unwrap();
        verify(config.clone(), Some(backup.id), true).await.unwrap();
        restore(config.clone(), backup.id, false).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("docs/notes/a.md")).unwrap(),
            "before"
        );

        // "after" was backed up before it was replaced
        let store = BackupStore::open(config.backup.dir.clone().unwrap()).await.unwrap();
        assert_eq!(store.list(&key).await.unwrap().len(), 2);
        store.close().await;

        assert!(verify(config.clone(), Some(Uuid::new_v4()), false).await.is_err());
        assert!(restore(config, Uuid::new_v4(), false).await.is_err());
    }

    #[tokio::test]
    async fn test_list_rejects_invalid_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::for_directory(dir.path());

        assert!(list(config, Some("../escape.md"), false).await.is_err());
    }
}
