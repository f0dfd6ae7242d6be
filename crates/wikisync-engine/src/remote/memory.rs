//! # In-Memory Remote
//!
//! A [`RemoteDocumentApi`] kept in process memory. Used by the engine tests
//! and by `--remote memory` dry runs.
//!
//! Clones share the same store, so a test can hold one handle for simulating
//! remote edits while the engine holds another. Failures and latency can be
//! injected to exercise retry and shutdown paths.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{DocumentMetadata, RemoteDocumentApi, RemoteEntry};
use crate::error::{SyncError, SyncResult};
use wikisync_core::{ItemShape, SyncKey};

#[derive(Debug, Clone)]
struct MemoryPage {
    content: Vec<u8>,
    title: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    pages: BTreeMap<SyncKey, MemoryPage>,
    folders: BTreeMap<SyncKey, DateTime<Utc>>,
    clock: Option<DateTime<Utc>>,
    fail_next: u32,
    failing: bool,
    latency: Option<Duration>,
    writes: usize,
    deletes: usize,
}

impl MemoryInner {
    /// Strictly increasing timestamps, so cursors never skip an edit.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }
}

/// Shared in-memory page store.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Simulated remote edits
    // =========================================================================

    /// Creates or edits a page as another wiki user would.
    pub async fn put(&self, key: &SyncKey, bytes: impl Into<Vec<u8>>) -> DateTime<Utc> {
        let mut inner = self.inner.write().await;
        let updated_at = inner.tick();
        inner.pages.insert(
            key.clone(),
            MemoryPage {
                content: bytes.into(),
                title: key.title().to_string(),
                updated_at,
            },
        );
        updated_at
    }

    /// Deletes a page as another wiki user would.
    pub async fn remove(&self, key: &SyncKey) -> bool {
        self.inner.write().await.pages.remove(key).is_some()
    }

    /// Places a folder at a document key.
    pub async fn put_folder(&self, key: &SyncKey) {
        let mut inner = self.inner.write().await;
        let at = inner.tick();
        inner.folders.insert(key.clone(), at);
    }

    pub async fn content(&self, key: &SyncKey) -> Option<Vec<u8>> {
        self.inner
            .read()
            .await
            .pages
            .get(key)
            .map(|p| p.content.clone())
    }

    pub async fn title(&self, key: &SyncKey) -> Option<String> {
        self.inner
            .read()
            .await
            .pages
            .get(key)
            .map(|p| p.title.clone())
    }

    pub async fn keys(&self) -> Vec<SyncKey> {
        self.inner.read().await.pages.keys().cloned().collect()
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Fails the next `n` API calls.
    pub async fn fail_next(&self, n: u32) {
        self.inner.write().await.fail_next = n;
    }

    /// Fails every API call until turned off.
    pub async fn set_failing(&self, failing: bool) {
        self.inner.write().await.failing = failing;
    }

    /// Delays every API call.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.inner.write().await.latency = latency;
    }

    /// Number of writes made through the API.
    pub async fn write_count(&self) -> usize {
        self.inner.read().await.writes
    }

    /// Number of deletes made through the API.
    pub async fn delete_count(&self) -> usize {
        self.inner.read().await.deletes
    }

    async fn enter(&self, op: &str) -> SyncResult<()> {
        let latency = {
            let mut inner = self.inner.write().await;
            if inner.failing || inner.fail_next > 0 {
                inner.fail_next = inner.fail_next.saturating_sub(1);
                return Err(SyncError::Remote(format!("injected failure in {}", op)));
            }
            inner.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDocumentApi for MemoryRemote {
    async fn list_changed_since(
        &self,
        cursor: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteEntry>> {
        self.enter("list_changed_since").await?;
        let inner = self.inner.read().await;

        let pages = inner.pages.iter().map(|(key, page)| RemoteEntry {
            key: key.clone(),
            modified_at: page.updated_at,
            shape: ItemShape::File,
        });
        let folders = inner.folders.iter().map(|(key, at)| RemoteEntry {
            key: key.clone(),
            modified_at: *at,
            shape: ItemShape::Directory,
        });

        Ok(pages
            .chain(folders)
            .filter(|e| cursor.map_or(true, |c| e.modified_at >= c))
            .collect())
    }

    async fn list_keys(&self) -> SyncResult<Vec<SyncKey>> {
        self.enter("list_keys").await?;
        let inner = self.inner.read().await;
        let keys: BTreeSet<SyncKey> = inner
            .pages
            .keys()
            .chain(inner.folders.keys())
            .cloned()
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn stat(&self, key: &SyncKey) -> SyncResult<Option<RemoteEntry>> {
        self.enter("stat").await?;
        let inner = self.inner.read().await;

        if let Some(at) = inner.folders.get(key) {
            return Ok(Some(RemoteEntry {
                key: key.clone(),
                modified_at: *at,
                shape: ItemShape::Directory,
            }));
        }
        Ok(inner.pages.get(key).map(|page| RemoteEntry {
            key: key.clone(),
            modified_at: page.updated_at,
            shape: ItemShape::File,
        }))
    }

    async fn read(&self, key: &SyncKey) -> SyncResult<Option<Vec<u8>>> {
        self.enter("read").await?;
        Ok(self
            .inner
            .read()
            .await
            .pages
            .get(key)
            .map(|p| p.content.clone()))
    }

    async fn write(
        &self,
        key: &SyncKey,
        bytes: &[u8],
        metadata: &DocumentMetadata,
    ) -> SyncResult<RemoteEntry> {
        self.enter("write").await?;
        let mut inner = self.inner.write().await;

        if inner.folders.contains_key(key) {
            return Err(SyncError::Remote(format!("{} is a folder", key)));
        }

        let updated_at = inner.tick();
        inner.pages.insert(
            key.clone(),
            MemoryPage {
                content: bytes.to_vec(),
                title: metadata.title.clone(),
                updated_at,
            },
        );
        inner.writes += 1;

        Ok(RemoteEntry {
            key: key.clone(),
            modified_at: updated_at,
            shape: ItemShape::File,
        })
    }

    async fn delete(&self, key: &SyncKey) -> SyncResult<()> {
        self.enter("delete").await?;
        let mut inner = self.inner.write().await;
        if inner.pages.remove(key).is_some() {
            inner.deletes += 1;
        }
        Ok(())
    }
}
