//! # Backups
//!
//! Every overwrite or delete is preceded by a backup of the content about to
//! be replaced. [`BackupManager`] reads that content through the side's
//! adapter and hands it to a [`BackupStorage`]. Stored bytes are checked
//! against their recorded SHA-256 before anything is restored from them.
//!
//! ## Retention
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sweep():  candidates = older than retention (30 days)                 │
//! │            keep       = newest backup of every key                     │
//! │            delete     = candidates − keep                              │
//! │                                                                         │
//! │  Runs on an interval (24h) in the background. A failed delete is       │
//! │  logged and retried on the next sweep.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::local::LocalFs;
use crate::remote::RemoteDocumentApi;
use wikisync_core::{Backup, BackupReason, ContentHash, Side, SyncKey};
use wikisync_db::BackupStore;

// =============================================================================
// BackupStorage Trait
// =============================================================================

/// Where backups are kept.
#[async_trait]
pub trait BackupStorage: Send + Sync {
    async fn store(
        &self,
        key: &SyncKey,
        side: Side,
        reason: BackupReason,
        bytes: &[u8],
    ) -> SyncResult<Backup>;

    /// Backups of one key, newest first.
    async fn list(&self, key: &SyncKey) -> SyncResult<Vec<Backup>>;

    /// A backup and its stored bytes.
    async fn read(&self, id: Uuid) -> SyncResult<(Backup, Vec<u8>)>;

    /// Backups older than `age`, oldest first.
    async fn list_older_than(&self, age: Duration) -> SyncResult<Vec<Backup>>;

    /// The newest backup of every key.
    async fn latest_per_key(&self) -> SyncResult<Vec<Backup>>;

    /// Returns false if the backup did not exist.
    async fn delete(&self, id: Uuid) -> SyncResult<bool>;
}

#[async_trait]
impl BackupStorage for BackupStore {
    async fn store(
        &self,
        key: &SyncKey,
        side: Side,
        reason: BackupReason,
        bytes: &[u8],
    ) -> SyncResult<Backup> {
        Ok(BackupStore::store(self, key, side, reason, bytes).await?)
    }

    async fn list(&self, key: &SyncKey) -> SyncResult<Vec<Backup>> {
        Ok(BackupStore::list(self, key).await?)
    }

    async fn read(&self, id: Uuid) -> SyncResult<(Backup, Vec<u8>)> {
        let backup = BackupStore::get(self, id)
            .await?
            .ok_or(SyncError::BackupNotFound(id))?;
        let bytes = self
            .blobs()
            .get(&backup.content_ref)
            .await
            .map_err(|e| SyncError::BackupCorrupt {
                id,
                key: backup.key.clone(),
                reason: e.to_string(),
            })?;
        Ok((backup, bytes))
    }

    async fn list_older_than(&self, age: Duration) -> SyncResult<Vec<Backup>> {
        Ok(BackupStore::list_older_than(self, Utc::now() - age).await?)
    }

    async fn latest_per_key(&self) -> SyncResult<Vec<Backup>> {
        Ok(BackupStore::latest_per_key(self).await?)
    }

    async fn delete(&self, id: Uuid) -> SyncResult<bool> {
        Ok(BackupStore::delete(self, id).await?)
    }
}

// =============================================================================
// Backup Manager
// =============================================================================

/// Result of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Backups removed.
    pub deleted: usize,
    /// Expired backups kept because they are their key's newest.
    pub kept: usize,
    /// Deletes that failed and will be retried.
    pub failed: usize,
}

/// Takes backups of either side and enforces retention.
#[derive(Clone)]
pub struct BackupManager {
    storage: Arc<dyn BackupStorage>,
    local: Arc<dyn LocalFs>,
    remote: Arc<dyn RemoteDocumentApi>,
    retention: Duration,
}

impl BackupManager {
    pub fn new(
        storage: Arc<dyn BackupStorage>,
        local: Arc<dyn LocalFs>,
        remote: Arc<dyn RemoteDocumentApi>,
        retention: Duration,
    ) -> Self {
        BackupManager {
            storage,
            local,
            remote,
            retention,
        }
    }

    pub fn storage(&self) -> &Arc<dyn BackupStorage> {
        &self.storage
    }

    /// Backs up what `side` currently holds at `key`.
    ///
    /// Returns `None` if the side holds nothing there. Any failure is a
    /// [`SyncError::Backup`], and the caller must not proceed with the write.
    pub async fn backup(
        &self,
        key: &SyncKey,
        side: Side,
        reason: BackupReason,
    ) -> SyncResult<Option<Backup>> {
        let content = match side {
            Side::Local => self.local.read(key).await,
            Side::Remote => self.remote.read(key).await,
        }
        .map_err(|e| SyncError::backup(key, format!("reading {} content: {}", side, e)))?;

        let Some(bytes) = content else {
            debug!(key = %key, %side, "Nothing to back up");
            return Ok(None);
        };

        let backup = self
            .storage
            .store(key, side, reason, &bytes)
            .await
            .map_err(|e| SyncError::backup(key, e))?;

        debug!(
            key = %key,
            %side,
            %reason,
            content_ref = %backup.content_ref.short(),
            "Backup taken"
        );
        Ok(Some(backup))
    }

    /// Reads a backup and checks its bytes against the recorded digest and
    /// size.
    pub async fn read_verified(&self, id: Uuid) -> SyncResult<(Backup, Vec<u8>)> {
        let (backup, bytes) = self.storage.read(id).await?;

        let actual = ContentHash::of(&bytes);
        if actual != backup.content_ref {
            return Err(SyncError::BackupCorrupt {
                id,
                key: backup.key,
                reason: format!(
                    "digest {} does not match recorded {}",
                    actual.short(),
                    backup.content_ref.short()
                ),
            });
        }
        if bytes.len() as u64 != backup.size {
            return Err(SyncError::BackupCorrupt {
                id,
                key: backup.key,
                reason: format!("{} bytes stored, {} recorded", bytes.len(), backup.size),
            });
        }
        Ok((backup, bytes))
    }

    /// Checks that a backup can still be restored.
    pub async fn verify(&self, id: Uuid) -> SyncResult<Backup> {
        let (backup, _) = self.read_verified(id).await?;
        debug!(id = %id, key = %backup.key, "Backup verified");
        Ok(backup)
    }

    /// Deletes expired backups, keeping each key's newest.
    pub async fn sweep(&self) -> SyncResult<SweepReport> {
        let candidates = self.storage.list_older_than(self.retention).await?;
        if candidates.is_empty() {
            return Ok(SweepReport::default());
        }

        let newest: HashSet<Uuid> = self
            .storage
            .latest_per_key()
            .await?
            .into_iter()
            .map(|b| b.id)
            .collect();

        let mut report = SweepReport::default();
        for backup in candidates {
            if newest.contains(&backup.id) {
                report.kept += 1;
                continue;
            }
            match self.storage.delete(backup.id).await {
                Ok(_) => report.deleted += 1,
                Err(e) => {
                    warn!(?e, id = %backup.id, key = %backup.key, "Failed to delete expired backup");
                    report.failed += 1;
                }
            }
        }

        info!(
            deleted = report.deleted,
            kept = report.kept,
            failed = report.failed,
            "Backup retention sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalSettings;
    use crate::local::{LocalTree, PathFilter};
    use crate::remote::MemoryRemote;

    fn key(s: &str) -> SyncKey {
        SyncKey::new(s).unwrap()
    }

    async fn manager(dir: &std::path::Path) -> (BackupManager, LocalTree, MemoryRemote) {
        std::fs::create_dir_all(dir.join("docs")).unwrap();
        let local = LocalTree::new(
            dir.join("docs"),
            PathFilter::from_settings(&LocalSettings::default()),
        );
        let remote = MemoryRemote::new();
        let store = BackupStore::in_memory(dir.join("backups")).await.unwrap();
        let manager = BackupManager::new(
            Arc::new(store),
            Arc::new(local.clone()),
            Arc::new(remote.clone()),
            Duration::days(30),
        );
        (manager, local, remote)
    }

    #[tokio::test]
    async fn test_backup_reads_the_requested_side() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, local, remote) = manager(dir.path()).await;
        let k = key("a.md");

        local.write(&k, b"local copy").await.unwrap();
        remote.put(&k, "remote copy").await;

        let backup = manager
            .backup(&k, Side::Remote, BackupReason::RoutineSync)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backup.side, Side::Remote);
        assert_eq!(backup.size, "remote copy".len() as u64);

        assert!(manager
            .backup(&key("missing.md"), Side::Local, BackupReason::RoutineSync)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_backup_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _local, remote) = manager(dir.path()).await;
        remote.set_failing(true).await;

        let err = manager
            .backup(&key("a.md"), Side::Remote, BackupReason::RoutineSync)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Backup { .. }));
    }

    #[tokio::test]
    async fn test_verify_detects_damaged_blob() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, local, _remote) = manager(dir.path()).await;
        local.write(&key("a.md"), b"snapshot").await.unwrap();
        let backup = manager
            .backup(&key("a.md"), Side::Local, BackupReason::RoutineSync)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(manager.verify(backup.id).await.unwrap(), backup);

        let blob = wikisync_db::BlobStore::new(dir.path().join("backups").join("objects"))
            .path_for(&backup.content_ref);
        std::fs::write(&blob, b"tampered").unwrap();
        assert!(matches!(
            manager.verify(backup.id).await,
            Err(SyncError::BackupCorrupt { .. })
        ));

        std::fs::remove_file(&blob).unwrap();
        assert!(matches!(
            manager.verify(backup.id).await,
            Err(SyncError::BackupCorrupt { .. })
        ));

        assert!(matches!(
            manager.verify(Uuid::new_v4()).await,
            Err(SyncError::BackupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_expired() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, local, _remote) = manager(dir.path()).await;
        local.write(&key("a.md"), b"v1").await.unwrap();
        manager
            .backup(&key("a.md"), Side::Local, BackupReason::RoutineSync)
            .await
            .unwrap();

        assert_eq!(manager.sweep().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_keeps_newest_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let (_, local, remote) = manager(dir.path()).await;
        let store = BackupStore::in_memory(dir.path().join("backups2")).await.unwrap();

        // Zero retention makes every existing backup a candidate
        let manager = BackupManager::new(
            Arc::new(store.clone()),
            Arc::new(local.clone()),
            Arc::new(remote),
            Duration::zero(),
        );

        local.write(&key("a.md"), b"v1").await.unwrap();
        manager.backup(&key("a.md"), Side::Local, BackupReason::RoutineSync).await.unwrap();
        local.write(&key("a.md"), b"v2").await.unwrap();
        manager.backup(&key("a.md"), Side::Local, BackupReason::RoutineSync).await.unwrap();
        local.write(&key("b.md"), b"only").await.unwrap();
        manager.backup(&key("b.md"), Side::Local, BackupReason::RoutineSync).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let report = manager.sweep().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.kept, 2);

        let remaining = store.list(&key("a.md")).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].size, 2);
        assert_eq!(store.list(&key("b.md")).await.unwrap().len(), 1);
    }
}
