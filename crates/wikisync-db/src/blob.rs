//! # Blob Store
//!
//! Content-addressed storage for backup bytes.
//!
//! ```text
//! <backup dir>/objects/
//! ├── ba/
//! │   └── 7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad
//! └── 2c/
//!     └── f24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
//! ```
//!
//! Blobs are written to a temporary name and renamed into place, so a reader
//! never observes a partial blob. Writing bytes that already exist is a no-op.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use wikisync_core::ContentHash;

/// Directory of content-addressed blobs.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Creates a store rooted at `root` (typically `<backup dir>/objects`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BlobStore { root: root.into() }
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensures the root directory exists.
    pub async fn init(&self) -> DbResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DbError::blob(&self.root, e))
    }

    /// Returns the on-disk path of a blob.
    pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        let (dir, file) = hex.split_at(2);
        self.root.join(dir).join(file)
    }

    /// Stores bytes and returns their content hash.
    pub async fn put(&self, bytes: &[u8]) -> DbResult<ContentHash> {
        let hash = ContentHash::of(bytes);
        let path = self.path_for(&hash);

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(content_ref = %hash.short(), "Blob already stored");
            return Ok(hash);
        }

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DbError::blob(&dir, e))?;

        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| DbError::blob(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(DbError::blob(&path, e));
        }

        debug!(content_ref = %hash.short(), size = bytes.len(), "Blob stored");
        Ok(hash)
    }

    /// Reads a blob back.
    pub async fn get(&self, hash: &ContentHash) -> DbResult<Vec<u8>> {
        let path = self.path_for(hash);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DbError::not_found("Blob", hash.to_hex()))
            }
            Err(e) => Err(DbError::blob(&path, e)),
        }
    }

    /// Returns true if the blob exists.
    pub async fn contains(&self, hash: &ContentHash) -> bool {
        fs::try_exists(self.path_for(hash)).await.unwrap_or(false)
    }

    /// Removes a blob. Missing blobs are not an error.
    pub async fn remove(&self, hash: &ContentHash) -> DbResult<()> {
        let path = self.path_for(hash);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(content_ref = %hash.short(), "Blob removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::blob(&path, e)),
        }
    }
}
