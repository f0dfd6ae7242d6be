//! # Transfer
//!
//! Copies a document (or its absence) onto one side after backing up what is
//! about to be replaced.
//!
//! ```text
//!   apply(key, to=Remote, content, target)
//!     │
//!     ├── target holds a file and was not backed up yet
//!     │      └── backup(key, Remote, RoutineSync) ── fails ──► abort, nothing written
//!     │
//!     ├── content = Some(bytes) ──► write   ──► Some(hash(bytes))
//!     └── content = None        ──► delete  ──► None
//!
//!   restore(backup id)
//!     └── verified bytes ──► apply(key, backup.side, bytes, current)
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backup::BackupManager;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalFs;
use crate::remote::{DocumentMetadata, RemoteDocumentApi};
use wikisync_core::{Backup, BackupReason, ContentHash, ItemShape, Side, SideState, SyncKey};

/// What one side holds at a key, read just before deciding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub state: SideState,
    /// Bytes of the document, when the side holds one.
    pub content: Option<Vec<u8>>,
    /// Last modification time reported by the side.
    pub modified: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn absent() -> Self {
        Observation {
            state: SideState::Absent,
            content: None,
            modified: None,
        }
    }

    fn directory(modified: Option<DateTime<Utc>>) -> Self {
        Observation {
            state: SideState::Directory,
            content: None,
            modified,
        }
    }

    fn file(content: Vec<u8>, modified: Option<DateTime<Utc>>) -> Self {
        Observation {
            state: SideState::File(ContentHash::of(&content)),
            content: Some(content),
            modified,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.state, SideState::File(_))
    }
}

/// Reads and writes either side, backing up before every destructive write.
#[derive(Clone)]
pub struct Transfer {
    local: Arc<dyn LocalFs>,
    remote: Arc<dyn RemoteDocumentApi>,
    backups: BackupManager,
}

impl Transfer {
    pub fn new(
        local: Arc<dyn LocalFs>,
        remote: Arc<dyn RemoteDocumentApi>,
        backups: BackupManager,
    ) -> Self {
        Transfer {
            local,
            remote,
            backups,
        }
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Reads what `side` currently holds at `key`.
    pub async fn observe(&self, key: &SyncKey, side: Side) -> SyncResult<Observation> {
        let (shape, modified) = match side {
            Side::Local => match self.local.stat(key).await? {
                Some(entry) => (entry.shape, entry.modified),
                None => return Ok(Observation::absent()),
            },
            Side::Remote => match self.remote.stat(key).await? {
                Some(entry) => (entry.shape, Some(entry.modified_at)),
                None => return Ok(Observation::absent()),
            },
        };

        if shape == ItemShape::Directory {
            return Ok(Observation::directory(modified));
        }

        let content = match side {
            Side::Local => self.local.read(key).await?,
            Side::Remote => self.remote.read(key).await?,
        };
        // Gone between stat and read
        Ok(match content {
            Some(bytes) => Observation::file(bytes, modified),
            None => Observation::absent(),
        })
    }

    /// Makes `to` hold `content` (or nothing) at `key`.
    ///
    /// `target` is what `to` held when the decision was made. When it is a
    /// file and `target_backed_up` is false, a routine backup is taken first
    /// and a failed backup aborts the write. Returns the hash now on `to`.
    pub async fn apply(
        &self,
        key: &SyncKey,
        to: Side,
        content: Option<&[u8]>,
        target: SideState,
        target_backed_up: bool,
    ) -> SyncResult<Option<ContentHash>> {
        if matches!(target, SideState::File(_)) && !target_backed_up {
            self.backups
                .backup(key, to, BackupReason::RoutineSync)
                .await?;
        }

        match content {
            Some(bytes) => {
                if target.is_directory() {
                    return Err(SyncError::transfer(
                        key,
                        format!("{} holds a directory at this key", to),
                    ));
                }
                self.write(key, to, bytes)
                    .await
                    .map_err(|e| SyncError::transfer(key, e))?;
                let hash = ContentHash::of(bytes);
                debug!(key = %key, %to, hash = %hash.short(), "Document transferred");
                Ok(Some(hash))
            }
            None => {
                if matches!(target, SideState::File(_)) {
                    self.delete(key, to)
                        .await
                        .map_err(|e| SyncError::transfer(key, e))?;
                    debug!(key = %key, %to, "Deletion transferred");
                }
                Ok(None)
            }
        }
    }

    /// Puts a backup's content back on the side it was taken from.
    ///
    /// The bytes are verified first. Whatever the side holds now is backed
    /// up before it is replaced, so a restore can itself be undone. The
    /// restored content then syncs to the other side like any local or
    /// remote edit. Returns the backup and whether anything was written.
    pub async fn restore(&self, id: Uuid) -> SyncResult<(Backup, bool)> {
        let (backup, bytes) = self.backups.read_verified(id).await?;
        let key = &backup.key;
        let current = self.observe(key, backup.side).await?;

        if current.state == SideState::File(backup.content_ref) {
            debug!(key = %key, side = %backup.side, "Side already holds the backup");
            return Ok((backup, false));
        }

        self.apply(key, backup.side, Some(&bytes), current.state, false)
            .await?;
        info!(
            id = %id,
            key = %key,
            side = %backup.side,
            content_ref = %backup.content_ref.short(),
            "Backup restored"
        );
        Ok((backup, true))
    }

    async fn write(&self, key: &SyncKey, to: Side, bytes: &[u8]) -> SyncResult<()> {
        match to {
            Side::Local => self.local.write(key, bytes).await,
            Side::Remote => self
                .remote
                .write(key, bytes, &DocumentMetadata::for_key(key))
                .await
                .map(|_| ()),
        }
    }

    async fn delete(&self, key: &SyncKey, to: Side) -> SyncResult<()> {
        match to {
            Side::Local => self.local.delete(key).await,
            Side::Remote => self.remote.delete(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalSettings;
    use crate::local::{LocalTree, PathFilter};
    use crate::remote::MemoryRemote;
    use wikisync_db::BackupStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        transfer: Transfer,
        local: LocalTree,
        remote: MemoryRemote,
        store: BackupStore,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let local = LocalTree::new(
            dir.path().join("docs"),
            PathFilter::from_settings(&LocalSettings::default()),
        );
        let remote = MemoryRemote::new();
        let store = BackupStore::in_memory(dir.path().join("backups")).await.unwrap();
        let backups = BackupManager::new(
            Arc::new(store.clone()),
            Arc::new(local.clone()),
            Arc::new(remote.clone()),
            chrono::Duration::days(30),
        );
        let transfer = Transfer::new(Arc::new(local.clone()), Arc::new(remote.clone()), backups);
        Fixture {
            _dir: dir,
            transfer,
            local,
            remote,
            store,
        }
    }

    fn key(s: &str) -> SyncKey {
        SyncKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_observe_both_sides() {
        let f = fixture().await;
        let k = key("a.md");
        f.local.write(&k, b"local").await.unwrap();
        f.remote.put_folder(&k).await;

        let local = f.transfer.observe(&k, Side::Local).await.unwrap();
        assert_eq!(local.state, SideState::File(ContentHash::of(b"local")));
        assert_eq!(local.content.as_deref(), Some(&b"local"[..]));
        assert!(local.modified.is_some());

        let remote = f.transfer.observe(&k, Side::Remote).await.unwrap();
        assert_eq!(remote.state, SideState::Directory);

        let missing = f.transfer.observe(&key("b.md"), Side::Remote).await.unwrap();
        assert_eq!(missing, Observation::absent());
    }

    #[tokio::test]
    async fn test_overwrite_is_backed_up_first() {
        let f = fixture().await;
        let k = key("notes/a.md");
        f.remote.put(&k, "old remote").await;

        let hash = f
            .transfer
            .apply(&k, Side::Remote, Some(b"new"), SideState::File(ContentHash::of(b"old remote")), false)
            .await
            .unwrap();
        assert_eq!(hash, Some(ContentHash::of(b"new")));
        assert_eq!(f.remote.content(&k).await.unwrap(), b"new");

        let backups = f.store.list(&k).await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].side, Side::Remote);
        assert_eq!(backups[0].reason, BackupReason::RoutineSync);
        assert_eq!(backups[0].content_ref, ContentHash::of(b"old remote"));
    }

    #[tokio::test]
    async fn test_create_needs_no_backup() {
        let f = fixture().await;
        let k = key("fresh.md");

        f.transfer
            .apply(&k, Side::Local, Some(b"hello"), SideState::Absent, false)
            .await
            .unwrap();
        assert_eq!(f.local.read(&k).await.unwrap().unwrap(), b"hello");
        assert!(f.store.list(&k).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_backup_aborts_write() {
        let f = fixture().await;
        let k = key("a.md");
        f.remote.put(&k, "keep me").await;
        f.remote.fail_next(1).await;

        let err = f
            .transfer
            .apply(&k, Side::Remote, Some(b"new"), SideState::File(ContentHash::of(b"keep me")), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Backup { .. }));
        assert_eq!(f.remote.content(&k).await.unwrap(), b"keep me");
        assert_eq!(f.remote.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_deletion_is_backed_up_and_applied() {
        let f = fixture().await;
        let k = key("gone.md");
        f.local.write(&k, b"doomed").await.unwrap();

        let hash = f
            .transfer
            .apply(&k, Side::Local, None, SideState::File(ContentHash::of(b"doomed")), false)
            .await
            .unwrap();
        assert_eq!(hash, None);
        assert!(f.local.read(&k).await.unwrap().is_none());
        assert_eq!(f.store.list(&k).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_backs_up_current_content() {
        let f = fixture().await;
        let k = key("notes/a.md");
        f.remote.put(&k, "good").await;
        f.transfer
            .apply(&k, Side::Remote, Some(b"bad"), SideState::File(ContentHash::of(b"good")), false)
            .await
            .unwrap();
        let taken = f.store.list(&k).await.unwrap()[0].clone();

        let (restored, written) = f.transfer.restore(taken.id).await.unwrap();
        assert!(written);
        assert_eq!(restored.id, taken.id);
        assert_eq!(f.remote.content(&k).await.unwrap(), b"good");

        // The replaced content is recoverable too
        let backups = f.store.list(&k).await.unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].content_ref, ContentHash::of(b"bad"));

        // Restoring again is a no-op
        let (_, written) = f.transfer.restore(taken.id).await.unwrap();
        assert!(!written);
        assert_eq!(f.store.list(&k).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_recreates_deleted_file() {
        let f = fixture().await;
        let k = key("gone.md");
        f.local.write(&k, b"keep").await.unwrap();
        f.transfer
            .apply(&k, Side::Local, None, SideState::File(ContentHash::of(b"keep")), false)
            .await
            .unwrap();
        let taken = f.store.list(&k).await.unwrap()[0].clone();

        f.transfer.restore(taken.id).await.unwrap();
        assert_eq!(f.local.read(&k).await.unwrap().unwrap(), b"keep");
        assert_eq!(f.store.list(&k).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_refuses_corrupt_backup() {
        let f = fixture().await;
        let k = key("a.md");
        f.local.write(&k, b"original").await.unwrap();
        let backup = f.store.store(&k, Side::Local, BackupReason::RoutineSync, b"original").await.unwrap();
        std::fs::write(f.store.blobs().path_for(&backup.content_ref), b"flipped").unwrap();
        f.local.write(&k, b"current").await.unwrap();

        let err = f.transfer.restore(backup.id).await.unwrap_err();
        assert!(matches!(err, SyncError::BackupCorrupt { .. }));
        assert_eq!(f.local.read(&k).await.unwrap().unwrap(), b"current");
    }

    #[tokio::test]
    async fn test_write_onto_directory_fails() {
        let f = fixture().await;
        let k = key("shape.md");
        f.remote.put_folder(&k).await;

        let err = f
            .transfer
            .apply(&k, Side::Remote, Some(b"x"), SideState::Directory, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transfer { .. }));
    }
}
