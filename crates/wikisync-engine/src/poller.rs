//! # Remote Poller
//!
//! Periodically asks the remote what changed and reports remote
//! [`SyncItem`]s to the orchestrator.
//!
//! ## Poll Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. list_changed_since(cursor)     changed entries (>= cursor)         │
//! │  2. read + hash each changed page  Created (unknown) / Modified        │
//! │  3. list_keys()                    every key present right now         │
//! │  4. send all items, then PollCompleted { cursor, present }             │
//! │                                                                         │
//! │  Any failure: nothing is sent but PollFailed; cursor and known set     │
//! │  stay as they were, so the next tick retries the whole cycle.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deletions are found by the orchestrator, which compares `present` with
//! the remote baselines in the state. The poller keeps its own cursor for
//! queries; the orchestrator persists the cursor it receives once the
//! reported changes have been processed.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::EngineMessage;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteDocumentApi;
use wikisync_core::{ChangeKind, ContentHash, ItemShape, Side, SyncItem, SyncKey};

enum PollerCommand {
    PollNow(oneshot::Sender<SyncResult<usize>>),
    Shutdown,
}

/// Controls a running [`RemotePoller`].
pub struct PollerHandle {
    commands: mpsc::Sender<PollerCommand>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Polls immediately. Resolves once the results are on the engine
    /// channel. Returns the number of changes reported.
    pub async fn poll_now(&self) -> SyncResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PollerCommand::PollNow(tx))
            .await
            .map_err(|_| SyncError::ChannelClosed("poller command channel closed".into()))?;
        rx.await
            .map_err(|_| SyncError::ChannelClosed("poller dropped poll reply".into()))?
    }

    /// Stops polling and waits for the task to end.
    pub async fn shutdown(self) {
        let _ = self.commands.send(PollerCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(?e, "Poller task ended abnormally");
        }
    }
}

/// Periodic remote change source.
pub struct RemotePoller {
    remote: Arc<dyn RemoteDocumentApi>,
    engine: mpsc::Sender<EngineMessage>,
    period: Duration,
    cursor: Option<DateTime<Utc>>,
    known: HashSet<SyncKey>,
}

impl RemotePoller {
    /// `cursor` and `known` come from the loaded state.
    pub fn new(
        remote: Arc<dyn RemoteDocumentApi>,
        engine: mpsc::Sender<EngineMessage>,
        period: Duration,
        cursor: Option<DateTime<Utc>>,
        known: impl IntoIterator<Item = SyncKey>,
    ) -> Self {
        RemotePoller {
            remote,
            engine,
            period,
            cursor,
            known: known.into_iter().collect(),
        }
    }

    /// Starts the poller task. With `periodic` off it only polls on demand.
    pub fn spawn(self, periodic: bool) -> PollerHandle {
        let (commands, command_rx) = mpsc::channel(8);
        let task = tokio::spawn(self.run(periodic, command_rx));
        PollerHandle { commands, task }
    }

    async fn run(mut self, periodic: bool, mut commands: mpsc::Receiver<PollerCommand>) {
        info!(period_ms = self.period.as_millis() as u64, periodic, "Remote poller starting");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick(), if periodic => {
                    if let Err(SyncError::ChannelClosed(_)) = self.poll().await {
                        break;
                    }
                }

                command = commands.recv() => match command {
                    Some(PollerCommand::PollNow(reply)) => {
                        let result = self.poll().await;
                        let _ = reply.send(result);
                    }
                    Some(PollerCommand::Shutdown) | None => break,
                },
            }
        }

        info!("Remote poller stopped");
    }

    /// One poll cycle; failures are reported to the orchestrator.
    async fn poll(&mut self) -> SyncResult<usize> {
        match self.collect().await {
            Ok((items, present, newest)) => {
                let count = items.len();
                for item in items {
                    self.send(EngineMessage::Change(item)).await?;
                }
                if newest.is_some() {
                    self.cursor = newest.max(self.cursor);
                }
                let mut listing: Vec<SyncKey> = present.iter().cloned().collect();
                listing.sort();
                self.known = present;
                self.send(EngineMessage::PollCompleted {
                    cursor: newest,
                    present: listing,
                })
                .await?;
                debug!(changes = count, cursor = ?self.cursor, "Remote poll completed");
                Ok(count)
            }
            Err(e) => {
                warn!(?e, "Remote poll failed");
                self.send(EngineMessage::PollFailed(e.to_string())).await?;
                Err(e)
            }
        }
    }

    /// Gathers one cycle's items without side effects.
    async fn collect(
        &self,
    ) -> SyncResult<(Vec<SyncItem>, HashSet<SyncKey>, Option<DateTime<Utc>>)> {
        let changed = self.remote.list_changed_since(self.cursor).await?;
        let present: HashSet<SyncKey> = self.remote.list_keys().await?.into_iter().collect();

        let mut items = Vec::with_capacity(changed.len());
        let mut newest: Option<DateTime<Utc>> = None;

        for entry in changed {
            newest = newest.max(Some(entry.modified_at));

            let kind = if self.known.contains(&entry.key) {
                ChangeKind::Modified
            } else {
                ChangeKind::Created
            };

            if entry.shape == ItemShape::Directory {
                items.push(
                    SyncItem::new(entry.key, Side::Remote, ChangeKind::Modified, None)
                        .with_shape(ItemShape::Directory),
                );
                continue;
            }

            // Deleted meanwhile; the next key listing reports it
            let Some(bytes) = self.remote.read(&entry.key).await? else {
                continue;
            };
            items.push(SyncItem::new(
                entry.key,
                Side::Remote,
                kind,
                Some(ContentHash::of(&bytes)),
            ));
        }

        Ok((items, present, newest))
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
    use crate::remote::MemoryRemote;

    fn key(s: &str) -> SyncKey {
        SyncKey::new(s).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<EngineMessage>) -> Vec<EngineMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn changes(messages: &[EngineMessage]) -> Vec<&SyncItem> {
        messages
            .iter()
            .filter_map(|m| match m {
                EngineMessage::Change(item) => Some(item),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_poll_reports_changes_and_listing() {
        let remote = MemoryRemote::new();
        remote.put(&key("a.md"), "a").await;
        let (tx, mut rx) = mpsc::channel(64);

        let handle = RemotePoller::new(
            Arc::new(remote.clone()),
            tx,
            Duration::from_secs(3600),
            None,
            vec![key("old.md")],
        )
        .spawn(false);

        assert_eq!(handle.poll_now().await.unwrap(), 1);
        let messages = drain(&mut rx);
        let items = changes(&messages);
        assert_eq!(items[0].key, key("a.md"));
        assert_eq!(items[0].change_kind, ChangeKind::Created);
        match messages.last() {
            Some(EngineMessage::PollCompleted { cursor, present }) => {
                assert!(cursor.is_some());
                assert_eq!(present, &vec![key("a.md")]);
            }
            other => panic!("unexpected message {:?}", other),
        }

        // Inclusive cursor re-reports the newest page, now as a modification
        handle.poll_now().await.unwrap();
        let messages = drain(&mut rx);
        let items = changes(&messages);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].change_kind, ChangeKind::Modified);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_cursor_and_retries() {
        let remote = MemoryRemote::new();
        remote.put(&key("a.md"), "a").await;
        let (tx, mut rx) = mpsc::channel(64);

        let handle = RemotePoller::new(
            Arc::new(remote.clone()),
            tx,
            Duration::from_secs(3600),
            None,
            Vec::new(),
        )
        .spawn(false);

        remote.fail_next(1).await;
        assert!(handle.poll_now().await.is_err());
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], EngineMessage::PollFailed(_)));

        // Cursor untouched: the page is still reported as new
        assert_eq!(handle.poll_now().await.unwrap(), 1);
        let messages = drain(&mut rx);
        assert_eq!(changes(&messages)[0].change_kind, ChangeKind::Created);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_periodic_poll_survives_failure() {
        let remote = MemoryRemote::new();
        remote.set_failing(true).await;
        let (tx, mut rx) = mpsc::channel(64);

        let handle = RemotePoller::new(
            Arc::new(remote.clone()),
            tx,
            Duration::from_millis(20),
            None,
            Vec::new(),
        )
        .spawn(true);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, EngineMessage::PollFailed(_)));

        remote.set_failing(false).await;
        remote.put(&key("b.md"), "b").await;
        loop {
            if let EngineMessage::Change(item) = rx.recv().await.unwrap() {
                assert_eq!(item.key, key("b.md"));
                break;
            }
        }

        handle.shutdown().await;
    }
}
