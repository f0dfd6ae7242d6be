//! # Backup Store
//!
//! The catalog and the blob directory behind one handle.
//!
//! ```text
//! <backup dir>/
//! ├── catalog.db        SQLite, one row per Backup
//! └── objects/          content-addressed bytes (see blob.rs)
//! ```
//!
//! ## Write Order
//! The blob is written before the catalog row, so every row points at bytes
//! that exist. On delete the row goes first and the blob is removed only when
//! no other row references it.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::error::{DbError, DbResult};
use crate::pool::{CatalogHealth, Database, DbConfig};
use wikisync_core::{Backup, BackupReason, Side, SyncKey};

/// File name of the catalog inside the backup directory.
pub const CATALOG_FILE: &str = "catalog.db";

/// Directory name of the blob store inside the backup directory.
pub const OBJECTS_DIR: &str = "objects";

/// Backup catalog plus blob storage.
#[derive(Debug, Clone)]
pub struct BackupStore {
    db: Database,
    blobs: BlobStore,
    dir: PathBuf,
}

impl BackupStore {
    /// Opens (creating if needed) a backup directory.
    pub async fn open(dir: impl Into<PathBuf>) -> DbResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DbError::blob(&dir, e))?;

        let db = Database::new(DbConfig::new(dir.join(CATALOG_FILE))).await?;
        let blobs = BlobStore::new(dir.join(OBJECTS_DIR));
        blobs.init().await?;

        info!(dir = %dir.display(), "Backup store opened");
        Ok(BackupStore { db, blobs, dir })
    }

    /// Opens a store with an in-memory catalog and blobs under `dir` (for testing).
    pub async fn in_memory(dir: impl Into<PathBuf>) -> DbResult<Self> {
        let dir = dir.into();
        let db = Database::new(DbConfig::in_memory()).await?;
        let blobs = BlobStore::new(dir.join(OBJECTS_DIR));
        blobs.init().await?;
        Ok(BackupStore { db, blobs, dir })
    }

    /// Returns the backup directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the blob store.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Stores a snapshot of one side's content and records it.
    pub async fn store(
        &self,
        key: &SyncKey,
        side: Side,
        reason: BackupReason,
        bytes: &[u8],
    ) -> DbResult<Backup> {
        let content_ref = self.blobs.put(bytes).await?;

        let backup = Backup {
            id: Uuid::new_v4(),
            key: key.clone(),
            side,
            content_ref,
            size: bytes.len() as u64,
            created_at: Utc::now(),
            reason,
        };

        let repo = self.db.backups();
        if let Err(e) = repo.insert(&backup).await {
            if repo.count_refs(&content_ref).await.unwrap_or(1) == 0 {
                let _ = self.blobs.remove(&content_ref).await;
            }
            return Err(e);
        }

        Ok(backup)
    }

    /// Backups of one key, newest first.
    pub async fn list(&self, key: &SyncKey) -> DbResult<Vec<Backup>> {
        self.db.backups().list_for_key(key).await
    }

    /// Every backup, newest first.
    pub async fn list_all(&self) -> DbResult<Vec<Backup>> {
        self.db.backups().list_all().await
    }

    /// Backups created before `cutoff`, oldest first.
    pub async fn list_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Backup>> {
        self.db.backups().list_older_than(cutoff).await
    }

    /// The newest backup of every key.
    pub async fn latest_per_key(&self) -> DbResult<Vec<Backup>> {
        self.db.backups().latest_per_key().await
    }

    /// Looks up one catalog row.
    pub async fn get(&self, id: Uuid) -> DbResult<Option<Backup>> {
        self.db.backups().get(id).await
    }

    /// Reads the bytes of a backup.
    pub async fn read(&self, id: Uuid) -> DbResult<(Backup, Vec<u8>)> {
        let backup = self
            .get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Backup", id.to_string()))?;
        let bytes = self.blobs.get(&backup.content_ref).await?;
        Ok((backup, bytes))
    }

    /// Number of backups in the catalog.
    pub async fn count(&self) -> DbResult<u64> {
        let count = self.db.backups().count().await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Catalog reachability and migration state.
    pub async fn health(&self) -> DbResult<CatalogHealth> {
        self.db.health().await
    }

    /// Deletes a backup row, and its blob once unreferenced.
    ///
    /// Returns false if the backup did not exist.
    pub async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let repo = self.db.backups();
        let Some(backup) = repo.get(id).await? else {
            return Ok(false);
        };

        repo.delete(id).await?;

        if repo.count_refs(&backup.content_ref).await? == 0 {
            if let Err(e) = self.blobs.remove(&backup.content_ref).await {
                warn!(?e, content_ref = %backup.content_ref.short(), "Failed to remove blob");
            }
        }

        Ok(true)
    }

    /// Closes the catalog.
    pub async fn close(&self) {
        self.db.close().await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> SyncKey {
        SyncKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_store_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::open(dir.path().join("backups")).await.unwrap();

        let backup = store
            .store(&key("notes/a.md"), Side::Remote, BackupReason::RoutineSync, b"old")
            .await
            .unwrap();
        assert_eq!(backup.size, 3);
        assert!(dir.path().join("backups").join(CATALOG_FILE).exists());

        let (read, bytes) = store.read(backup.id).await.unwrap();
        assert_eq!(read.id, backup.id);
        assert_eq!(bytes, b"old");

        let listed = store.list(&key("notes/a.md")).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_blob_survives_until_last_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::in_memory(dir.path()).await.unwrap();

        let b1 = store
            .store(&key("a.md"), Side::Local, BackupReason::ConflictResolution, b"same")
            .await
            .unwrap();
        let b2 = store
            .store(&key("b.md"), Side::Remote, BackupReason::RoutineSync, b"same")
            .await
            .unwrap();
        assert_eq!(b1.content_ref, b2.content_ref);

        assert!(store.delete(b1.id).await.unwrap());
        assert!(store.blobs().contains(&b2.content_ref).await);

        assert!(store.delete(b2.id).await.unwrap());
        assert!(!store.blobs().contains(&b2.content_ref).await);

        assert!(!store.delete(b2.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_catalog_health_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::open(dir.path().join("backups")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        store
            .store(&key("a.md"), Side::Local, BackupReason::RoutineSync, b"one")
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let health = store.health().await.unwrap();
        assert!(health.is_current());
        store.close().await;
    }

    #[tokio::test]
    async fn test_read_missing_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::in_memory(dir.path()).await.unwrap();
        let id = Uuid::new_v4();
        assert!(store.get(id).await.unwrap().is_none());
        assert!(matches!(store.read(id).await, Err(DbError::NotFound { .. })));
    }
}
