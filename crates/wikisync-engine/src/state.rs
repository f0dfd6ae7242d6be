//! # State Persistence
//!
//! The [`StateStorage`] seam and [`JsonStateFile`], which keeps the
//! [`StateSnapshot`] as one pretty-printed JSON document.
//!
//! ## Lifecycle
//! ```text
//! start ──► load ──┬── missing   → empty snapshot
//!                  ├── ok        → snapshot
//!                  └── corrupt   → quarantine to state.json.corrupt-<ts>,
//!                                  empty snapshot, StateLoadFailed event
//!
//! after each batch / on stop ──► save (write state.json.tmp, rename)
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use wikisync_core::state::STATE_VERSION;
use wikisync_core::StateSnapshot;

/// Durable storage of the engine state.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// `Ok(None)` when no state has been saved yet; `Err(StateLoad)` when the
    /// stored state cannot be used.
    async fn load(&self) -> SyncResult<Option<StateSnapshot>>;

    /// Replaces the stored state.
    async fn save(&self, snapshot: &StateSnapshot) -> SyncResult<()>;

    /// Moves unusable state out of the way. Returns where it went.
    async fn quarantine(&self) -> SyncResult<Option<String>>;
}

/// [`StateStorage`] in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonStateFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_error(&self, reason: impl ToString) -> SyncError {
        SyncError::StateLoad {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        self.path.with_file_name(format!("{}{}", name, suffix))
    }
}

#[async_trait]
impl StateStorage for JsonStateFile {
    async fn load(&self) -> SyncResult<Option<StateSnapshot>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet");
                return Ok(None);
            }
            Err(e) => return Err(self.load_error(e)),
        };

        let snapshot: StateSnapshot =
            serde_json::from_str(&contents).map_err(|e| self.load_error(e))?;

        if snapshot.version > STATE_VERSION {
            return Err(self.load_error(format!(
                "state version {} is newer than supported version {}",
                snapshot.version, STATE_VERSION
            )));
        }

        debug!(
            path = %self.path.display(),
            records = snapshot.records.len(),
            conflicts = snapshot.conflicts.len(),
            "State loaded"
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &StateSnapshot) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::StateSave(format!("{}: {}", parent.display(), e)))?;
        }

        let contents = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.sibling(".tmp");
        fs::write(&tmp, contents)
            .await
            .map_err(|e| SyncError::StateSave(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::StateSave(format!("{}: {}", self.path.display(), e)))?;

        debug!(records = snapshot.records.len(), "State saved");
        Ok(())
    }

    async fn quarantine(&self) -> SyncResult<Option<String>> {
        let target = self.sibling(&format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));

        match fs::rename(&self.path, &target).await {
            Ok(()) => {
                warn!(from = %self.path.display(), to = %target.display(), "Unreadable state moved aside");
                Ok(Some(target.display().to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::StateSave(format!(
                "could not move {} aside: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikisync_core::{ChangeKind, ContentHash, Side, SyncKey, SyncStateRecord};

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateFile::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateFile::new(dir.path().join("nested/state.json"));

        let mut snapshot = StateSnapshot::default();
        let key = SyncKey::new("notes/a.md").unwrap();
        snapshot.upsert(SyncStateRecord::converged(
            key.clone(),
            Some(ContentHash::of(b"H1")),
            Side::Local,
            ChangeKind::Created,
        ));
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.record(&key), snapshot.record(&key));
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonStateFile::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SyncError::StateLoad { .. }));

        let moved = store.quarantine().await.unwrap().unwrap();
        assert!(moved.contains("state.json.corrupt-"));
        assert!(!path.exists());
        assert!(Path::new(&moved).exists());
        assert!(store.load().await.unwrap().is_none());
    }
}
