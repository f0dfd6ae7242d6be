//! # Remote Document API
//!
//! The [`RemoteDocumentApi`] seam between the engine and the wiki.
//!
//! ```text
//! ┌──────────────────┐      ┌─────────────────────────────────────────────┐
//! │  Poller, Worker  │ ───► │  dyn RemoteDocumentApi                      │
//! └──────────────────┘      │   ├── WikiJsClient  (GraphQL over reqwest)  │
//!                           │   └── MemoryRemote  (tests, dry runs)       │
//!                           └─────────────────────────────────────────────┘
//! ```
//!
//! Pages are addressed by [`SyncKey`]; the adapter maps keys to its own
//! paths (`notes/a.md` ↔ page `notes/a`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use wikisync_core::{ItemShape, SyncKey};

pub mod memory;
pub mod wikijs;

pub use memory::MemoryRemote;
pub use wikijs::WikiJsClient;

/// What the remote holds at one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub key: SyncKey,
    pub modified_at: DateTime<Utc>,
    pub shape: ItemShape,
}

/// Page attributes sent along with content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl DocumentMetadata {
    /// Metadata derived from the key alone.
    pub fn for_key(key: &SyncKey) -> Self {
        DocumentMetadata {
            title: key.title().to_string(),
            ..Default::default()
        }
    }
}

/// Access to the remote document store.
#[async_trait]
pub trait RemoteDocumentApi: Send + Sync {
    /// Entries modified at or after `cursor` (all entries when `None`),
    /// in any order.
    async fn list_changed_since(
        &self,
        cursor: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteEntry>>;

    /// Every key currently present, for deletion detection.
    async fn list_keys(&self) -> SyncResult<Vec<SyncKey>>;

    /// `None` if nothing exists at the key.
    async fn stat(&self, key: &SyncKey) -> SyncResult<Option<RemoteEntry>>;

    /// `None` if the document does not exist.
    async fn read(&self, key: &SyncKey) -> SyncResult<Option<Vec<u8>>>;

    /// Creates or replaces a document.
    async fn write(
        &self,
        key: &SyncKey,
        bytes: &[u8],
        metadata: &DocumentMetadata,
    ) -> SyncResult<RemoteEntry>;

    /// Removes a document. Missing documents are not an error.
    async fn delete(&self, key: &SyncKey) -> SyncResult<()>;
}
