//! # Local Document Tree
//!
//! The [`LocalFs`] seam and its filesystem implementation, [`LocalTree`].
//!
//! ## Path Filter
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  notes/a.md                 → document                                 │
//! │  notes/a.txt                → ignored (extension)                      │
//! │  .git/HEAD, node_modules/x  → ignored (excluded directory)             │
//! │  notes/.draft.md            → ignored (hidden)                         │
//! │  notes/a.md~, a.md.swp,     → ignored (editor temp files)              │
//! │  #a.md#, a.md.tmp                                                      │
//! │  huge.md (> max_file_size)  → ignored (size)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes go to a hidden temporary file next to the target and are renamed
//! into place, so the watcher never sees a half-written document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::LocalSettings;
use crate::error::{SyncError, SyncResult};
use wikisync_core::{ItemShape, SyncKey};

// =============================================================================
// Path Filter
// =============================================================================

/// Decides which paths under the root are documents.
#[derive(Debug, Clone)]
pub struct PathFilter {
    extensions: Vec<String>,
    exclude_dirs: Vec<String>,
    include_hidden: bool,
    max_file_size: u64,
}

impl PathFilter {
    pub fn from_settings(settings: &LocalSettings) -> Self {
        PathFilter {
            extensions: settings
                .include_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_dirs: settings.exclude_dirs.clone(),
            include_hidden: settings.include_hidden,
            max_file_size: settings.max_file_size,
        }
    }

    /// Returns true if a directory with this name may be descended into.
    pub fn accepts_dir_name(&self, name: &str) -> bool {
        if self.exclude_dirs.iter().any(|d| d == name) {
            return false;
        }
        self.include_hidden || !name.starts_with('.')
    }

    /// Returns true if the key names a document: every parent directory is
    /// accepted and the file name is a non-temporary document name.
    pub fn accepts_key(&self, key: &SyncKey) -> bool {
        let mut segments: Vec<&str> = key.as_str().split('/').collect();
        let Some(name) = segments.pop() else {
            return false;
        };

        if !segments.iter().all(|dir| self.accepts_dir_name(dir)) {
            return false;
        }
        if !self.include_hidden && name.starts_with('.') {
            return false;
        }
        if is_temp_name(name) {
            return false;
        }

        match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    pub fn accepts_size(&self, size: u64) -> bool {
        size <= self.max_file_size
    }
}

/// Editor swap and backup files.
fn is_temp_name(name: &str) -> bool {
    name.ends_with('~')
        || name.ends_with(".tmp")
        || name.ends_with(".swp")
        || (name.starts_with('#') && name.ends_with('#'))
}

// =============================================================================
// LocalFs Trait
// =============================================================================

/// What the local tree holds at one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub key: SyncKey,
    pub shape: ItemShape,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Access to the local document tree, addressed by key.
#[async_trait]
pub trait LocalFs: Send + Sync {
    /// Every document (and every directory sitting at a document key).
    async fn list(&self) -> SyncResult<Vec<LocalEntry>>;

    /// `None` if nothing exists at the key.
    async fn stat(&self, key: &SyncKey) -> SyncResult<Option<LocalEntry>>;

    /// `None` if the document does not exist.
    async fn read(&self, key: &SyncKey) -> SyncResult<Option<Vec<u8>>>;

    /// Creates or replaces a document, creating parent directories.
    async fn write(&self, key: &SyncKey, bytes: &[u8]) -> SyncResult<()>;

    /// Removes a document. Missing documents are not an error.
    async fn delete(&self, key: &SyncKey) -> SyncResult<()>;
}

// =============================================================================
// LocalTree
// =============================================================================

/// [`LocalFs`] over a directory on disk.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
    filter: PathFilter,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>, filter: PathFilter) -> Self {
        LocalTree {
            root: root.into(),
            filter,
        }
    }

    pub fn from_settings(settings: &LocalSettings) -> SyncResult<Self> {
        let root = settings
            .root
            .clone()
            .ok_or_else(|| SyncError::config("local.root", "required"))?;
        Ok(Self::new(root, PathFilter::from_settings(settings)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    fn path_of(&self, key: &SyncKey) -> PathBuf {
        key.to_path(&self.root)
    }

    fn entry_from_metadata(key: SyncKey, meta: &std::fs::Metadata) -> LocalEntry {
        LocalEntry {
            key,
            shape: if meta.is_dir() {
                ItemShape::Directory
            } else {
                ItemShape::File
            },
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

#[async_trait]
impl LocalFs for LocalTree {
    async fn list(&self) -> SyncResult<Vec<LocalEntry>> {
        let root = self.root.clone();
        let filter = self.filter.clone();

        tokio::task::spawn_blocking(move || walk(&root, &filter))
            .await
            .map_err(|e| SyncError::Local(format!("scan task failed: {}", e)))?
    }

    async fn stat(&self, key: &SyncKey) -> SyncResult<Option<LocalEntry>> {
        match fs::metadata(self.path_of(key)).await {
            Ok(meta) => Ok(Some(Self::entry_from_metadata(key.clone(), &meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::Local(format!("stat {}: {}", key, e))),
        }
    }

    async fn read(&self, key: &SyncKey) -> SyncResult<Option<Vec<u8>>> {
        match fs::read(self.path_of(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::Local(format!("read {}: {}", key, e))),
        }
    }

    async fn write(&self, key: &SyncKey, bytes: &[u8]) -> SyncResult<()> {
        let path = self.path_of(key);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SyncError::Local(format!("create {}: {}", dir.display(), e)))?;

        let tmp = dir.join(format!(".{}.wikisync-{}", key.title(), Uuid::new_v4()));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| SyncError::Local(format!("write {}: {}", key, e)))?;

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(SyncError::Local(format!("replace {}: {}", key, e)));
        }

        debug!(key = %key, size = bytes.len(), "Local document written");
        Ok(())
    }

    async fn delete(&self, key: &SyncKey) -> SyncResult<()> {
        match fs::remove_file(self.path_of(key)).await {
            Ok(()) => {
                debug!(key = %key, "Local document deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Local(format!("delete {}: {}", key, e))),
        }
    }
}

/// Walks the tree below `root`, skipping excluded directories.
fn walk(root: &Path, filter: &PathFilter) -> SyncResult<Vec<LocalEntry>> {
    if !root.is_dir() {
        return Err(SyncError::Local(format!(
            "root {} is not a directory",
            root.display()
        )));
    }

    let mut entries = Vec::new();
    let walker = WalkDir::new(root).min_depth(1).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e.file_type().is_dir()
            || e.file_name()
                .to_str()
                .is_some_and(|name| filter.accepts_dir_name(name))
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(?e, "Skipping unreadable path during scan");
                continue;
            }
        };

        let Ok(key) = SyncKey::from_path(root, entry.path()) else {
            continue;
        };
        if !filter.accepts_key(&key) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(?e, key = %key, "Skipping path without metadata");
                continue;
            }
        };
        if meta.is_file() && !filter.accepts_size(meta.len()) {
            debug!(key = %key, size = meta.len(), "Skipping oversized document");
            continue;
        }
        if meta.is_file() || meta.is_dir() {
            entries.push(LocalTree::entry_from_metadata(key, &meta));
        }
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> SyncKey {
        SyncKey::new(s).unwrap()
    }

    fn tree(root: &Path) -> LocalTree {
        LocalTree::new(root, PathFilter::from_settings(&LocalSettings::default()))
    }

    #[test]
    fn test_filter_rules() {
        let filter = PathFilter::from_settings(&LocalSettings::default());

        assert!(filter.accepts_key(&key("notes/a.md")));
        assert!(filter.accepts_key(&key("README.MD")));
        assert!(!filter.accepts_key(&key("notes/a.txt")));
        assert!(!filter.accepts_key(&key(".git/x.md")));
        assert!(!filter.accepts_key(&key("node_modules/pkg/readme.md")));
        assert!(!filter.accepts_key(&key("notes/.draft.md")));
        assert!(!filter.accepts_key(&key("notes/a.md~")));
        assert!(!filter.accepts_key(&key("notes/#a.md#")));
        assert!(!filter.accepts_key(&key("notes/a.md.swp")));
        assert!(filter.accepts_size(1024));
        assert!(!filter.accepts_size(wikisync_core::DEFAULT_MAX_FILE_SIZE + 1));
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tree(dir.path());
        let k = key("notes/deep/a.md");

        assert!(tree.read(&k).await.unwrap().is_none());
        tree.write(&k, b"hello").await.unwrap();
        assert_eq!(tree.read(&k).await.unwrap().unwrap(), b"hello");

        let stat = tree.stat(&k).await.unwrap().unwrap();
        assert_eq!(stat.shape, ItemShape::File);
        assert_eq!(stat.size, 5);

        tree.write(&k, b"replaced").await.unwrap();
        assert_eq!(tree.read(&k).await.unwrap().unwrap(), b"replaced");

        tree.delete(&k).await.unwrap();
        assert!(tree.stat(&k).await.unwrap().is_none());
        tree.delete(&k).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_applies_filter() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("notes")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join("moved.md")).unwrap();
        std::fs::write(root.join("notes/a.md"), "a").unwrap();
        std::fs::write(root.join("notes/b.txt"), "b").unwrap();
        std::fs::write(root.join("notes/a.md~"), "old").unwrap();
        std::fs::write(root.join(".git/c.md"), "c").unwrap();

        let listed = tree(root).list().await.unwrap();
        let keys: Vec<(&str, ItemShape)> = listed
            .iter()
            .map(|e| (e.key.as_str(), e.shape))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("moved.md", ItemShape::Directory),
                ("notes/a.md", ItemShape::File)
            ]
        );
    }
}
