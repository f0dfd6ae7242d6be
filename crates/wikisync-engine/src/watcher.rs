//! # Local Watcher
//!
//! Turns filesystem notifications into debounced local [`SyncItem`]s.
//!
//! ```text
//! ┌──────────────┐  raw events   ┌─────────────────────────────────────────┐
//! │ notify       │ ────────────► │ LocalWatcher task                       │
//! │ (OS thread)  │  unbounded    │                                         │
//! └──────────────┘               │  pending: path → last event time        │
//!                                │  every debounce/2: settled paths        │
//!                                │     file       → Created/Modified+hash  │
//!                                │     missing    → Deleted                │
//!                                │     directory  → Modified (Directory)   │
//!                                │     other dir  → full rescan            │
//!                                │                                         │
//!                                │  commands: Rescan(ack) | Shutdown       │
//!                                └───────────────┬─────────────────────────┘
//!                                                │ EngineMessage::Change
//!                                                ▼
//!                                          orchestrator
//! ```
//!
//! A rescan reports every document currently in the tree, then a
//! [`EngineMessage::LocalListing`] so the orchestrator can spot deletions
//! that happened while nobody was watching.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::EngineMessage;
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalEntry, LocalFs, PathFilter};
use wikisync_core::{ChangeKind, ContentHash, ItemShape, Side, SyncItem, SyncKey};

/// Shortest flush period, whatever the debounce delay.
const MIN_FLUSH_PERIOD: Duration = Duration::from_millis(10);

// =============================================================================
// Handle
// =============================================================================

enum WatcherCommand {
    Rescan(oneshot::Sender<SyncResult<usize>>),
    Shutdown,
}

/// Controls a running [`LocalWatcher`].
pub struct WatcherHandle {
    commands: mpsc::Sender<WatcherCommand>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Reports every local document again. Resolves once all reports are
    /// on the engine channel. Returns the number of documents found.
    pub async fn rescan(&self) -> SyncResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WatcherCommand::Rescan(tx))
            .await
            .map_err(|_| SyncError::ChannelClosed("watcher command channel closed".into()))?;
        rx.await
            .map_err(|_| SyncError::ChannelClosed("watcher dropped rescan reply".into()))?
    }

    /// Stops watching and waits for the task to end.
    pub async fn shutdown(self) {
        let _ = self.commands.send(WatcherCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(?e, "Watcher task ended abnormally");
        }
    }
}

// =============================================================================
// Watcher
// =============================================================================

/// Debounced local change source.
pub struct LocalWatcher {
    local: Arc<dyn LocalFs>,
    root: PathBuf,
    filter: PathFilter,
    debounce: Duration,
    engine: mpsc::Sender<EngineMessage>,
}

struct Pending {
    last_event: Instant,
    created: bool,
}

impl LocalWatcher {
    pub fn new(
        local: Arc<dyn LocalFs>,
        root: PathBuf,
        filter: PathFilter,
        debounce: Duration,
        engine: mpsc::Sender<EngineMessage>,
    ) -> Self {
        LocalWatcher {
            local,
            root,
            filter,
            debounce,
            engine,
        }
    }

    /// Starts the watcher task. With `watch` off only rescans report changes.
    ///
    /// The task begins with a full rescan.
    pub fn spawn(self, watch: bool) -> SyncResult<WatcherHandle> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Event>();

        let os_watcher = if watch {
            let mut watcher =
                notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                    Ok(event) => {
                        if raw_tx.send(event).is_err() {
                            debug!("Watcher task gone, dropping file event");
                        }
                    }
                    Err(e) => error!(?e, "File watcher error"),
                })
                .map_err(|e| SyncError::Local(format!("cannot create file watcher: {}", e)))?;
            watcher
                .watch(&self.root, RecursiveMode::Recursive)
                .map_err(|e| {
                    SyncError::Local(format!("cannot watch {}: {}", self.root.display(), e))
                })?;
            info!(root = %self.root.display(), "Watching local tree");
            Some(watcher)
        } else {
            None
        };

        let (commands, command_rx) = mpsc::channel(8);
        let task = tokio::spawn(self.run(os_watcher, raw_rx, command_rx));
        Ok(WatcherHandle { commands, task })
    }

    async fn run(
        self,
        _os_watcher: Option<RecommendedWatcher>,
        mut raw_rx: mpsc::UnboundedReceiver<Event>,
        mut commands: mpsc::Receiver<WatcherCommand>,
    ) {
        if let Err(e) = self.rescan().await {
            warn!(?e, "Initial local scan failed");
        }

        let mut pending: HashMap<PathBuf, Pending> = HashMap::new();
        let mut flush = interval((self.debounce / 2).max(MIN_FLUSH_PERIOD));
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = raw_rx.recv() => {
                    let created = matches!(event.kind, EventKind::Create(_));
                    if matches!(event.kind, EventKind::Access(_)) {
                        continue;
                    }
                    for path in event.paths {
                        let entry = pending.entry(path).or_insert(Pending {
                            last_event: Instant::now(),
                            created,
                        });
                        entry.last_event = Instant::now();
                        entry.created |= created;
                    }
                }

                _ = flush.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    let settled: Vec<(PathBuf, bool)> = pending
                        .iter()
                        .filter(|(_, p)| p.last_event.elapsed() >= self.debounce)
                        .map(|(path, p)| (path.clone(), p.created))
                        .collect();
                    if let Err(e) = self.flush(&mut pending, settled).await {
                        warn!(?e, "Failed to report local changes");
                        if matches!(e, SyncError::ChannelClosed(_)) {
                            break;
                        }
                    }
                }

                command = commands.recv() => match command {
                    Some(WatcherCommand::Rescan(reply)) => {
                        let _ = reply.send(self.rescan().await);
                    }
                    Some(WatcherCommand::Shutdown) | None => break,
                },
            }
        }

        info!("Local watcher stopped");
    }

    async fn flush(
        &self,
        pending: &mut HashMap<PathBuf, Pending>,
        settled: Vec<(PathBuf, bool)>,
    ) -> SyncResult<()> {
        let mut needs_rescan = false;

        for (path, created) in settled {
            pending.remove(&path);

            match self.document_key(&path) {
                Some(key) => {
                    if let Some(item) = self.observe(&key, created).await {
                        self.send(EngineMessage::Change(item)).await?;
                    }
                }
                // A directory moved or removed as a whole
                None => needs_rescan |= self.inside_tree(&path) && !path.is_file(),
            }
        }

        if needs_rescan {
            debug!("Directory change seen, rescanning");
            self.rescan().await?;
        }
        Ok(())
    }

    /// Reports the current state of every document, then the full listing.
    async fn rescan(&self) -> SyncResult<usize> {
        let entries = self.local.list().await?;
        let mut keys = Vec::with_capacity(entries.len());

        for entry in entries {
            keys.push(entry.key.clone());
            if let Some(item) = self.item_for_entry(entry, false).await {
                self.send(EngineMessage::Change(item)).await?;
            }
        }

        let count = keys.len();
        self.send(EngineMessage::LocalListing(keys)).await?;
        debug!(documents = count, "Local rescan reported");
        Ok(count)
    }

    /// Current state of one settled document path.
    async fn observe(&self, key: &SyncKey, created: bool) -> Option<SyncItem> {
        match self.local.stat(key).await {
            Ok(Some(entry)) => self.item_for_entry(entry, created).await,
            Ok(None) => Some(SyncItem::deleted(key.clone(), Side::Local)),
            Err(e) => {
                warn!(?e, key = %key, "Cannot stat changed path");
                None
            }
        }
    }

    async fn item_for_entry(&self, entry: LocalEntry, created: bool) -> Option<SyncItem> {
        if entry.shape == ItemShape::Directory {
            return Some(
                SyncItem::new(entry.key, Side::Local, ChangeKind::Modified, None)
                    .with_shape(ItemShape::Directory),
            );
        }
        if !self.filter.accepts_size(entry.size) {
            debug!(key = %entry.key, size = entry.size, "Ignoring oversized document");
            return None;
        }

        match self.local.read(&entry.key).await {
            Ok(Some(bytes)) => {
                let kind = if created {
                    ChangeKind::Created
                } else {
                    ChangeKind::Modified
                };
                Some(SyncItem::new(
                    entry.key,
                    Side::Local,
                    kind,
                    Some(ContentHash::of(&bytes)),
                ))
            }
            // Removed between stat and read; the delete event follows
            Ok(None) => None,
            Err(e) => {
                warn!(?e, key = %entry.key, "Cannot read changed document");
                None
            }
        }
    }

    fn document_key(&self, path: &Path) -> Option<SyncKey> {
        SyncKey::from_path(&self.root, path)
            .ok()
            .filter(|key| self.filter.accepts_key(key))
    }

    /// Returns true if the path lies below the root in directories we scan.
    fn inside_tree(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        relative.components().all(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|name| self.filter.accepts_dir_name(name))
        })
    }

    async fn send(&self, message: EngineMessage) -> SyncResult<()> {
        self.engine
            .send(message)
            .await
            .map_err(|_| SyncError::ChannelClosed("engine channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalSettings;
    use crate::local::LocalTree;

    fn watcher(root: &Path, tx: mpsc::Sender<EngineMessage>) -> LocalWatcher {
        let filter = PathFilter::from_settings(&LocalSettings::default());
        LocalWatcher::new(
            Arc::new(LocalTree::new(root, filter.clone())),
            root.to_path_buf(),
            filter,
            Duration::from_millis(50),
            tx,
        )
    }

    async fn next_change(rx: &mut mpsc::Receiver<EngineMessage>) -> SyncItem {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("no engine message in time")
                .expect("channel closed");
            if let EngineMessage::Change(item) = message {
                return item;
            }
        }
    }

    #[tokio::test]
    async fn test_rescan_reports_documents_then_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/a.md"), "a").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "x").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = watcher(dir.path(), tx).spawn(false).unwrap();

        // Initial scan
        let item = next_change(&mut rx).await;
        assert_eq!(item.key.as_str(), "notes/a.md");
        assert_eq!(item.content_hash, Some(ContentHash::of(b"a")));
        match rx.recv().await.unwrap() {
            EngineMessage::LocalListing(keys) => assert_eq!(keys.len(), 1),
            other => panic!("unexpected message {:?}", other),
        }

        assert_eq!(handle.rescan().await.unwrap(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_debounced_edit_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let handle = watcher(&root, tx).spawn(true).unwrap();
        handle.rescan().await.unwrap();
        while let Ok(message) = rx.try_recv() {
            drop(message);
        }

        std::fs::write(root.join("doc.md"), "v1").unwrap();
        std::fs::write(root.join("doc.md"), "v2").unwrap();

        let item = next_change(&mut rx).await;
        assert_eq!(item.key.as_str(), "doc.md");
        assert_eq!(item.content_hash, Some(ContentHash::of(b"v2")));

        std::fs::remove_file(root.join("doc.md")).unwrap();
        let mut item = next_change(&mut rx).await;
        while !item.is_deletion() {
            item = next_change(&mut rx).await;
        }
        assert_eq!(item.key.as_str(), "doc.md");

        handle.shutdown().await;
    }
}
