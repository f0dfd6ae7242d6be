//! # Sync Engine
//!
//! The orchestrator task and [`SyncEngine`], the operator-facing handle.
//!
//! ## Task Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              SyncEngine                                 │
//! │   start / stop / status / list_conflicts / resolve_conflict / sync_now  │
//! │   sweep_backups / verify_backup / restore_backup (direct, no queue)     │
//! └───────────────┬─────────────────────────────────────────────────────────┘
//!                 │ EngineMessage::Command
//!                 ▼
//! ┌──────────────┐   Change / LocalListing   ┌────────────────────────────┐
//! │ LocalWatcher │ ────────────────────────► │        Orchestrator        │
//! └──────────────┘                           │                            │
//! ┌──────────────┐   Change / PollCompleted  │  owns: StateSnapshot       │
//! │ RemotePoller │ ────────────────────────► │        SyncQueue           │
//! └──────────────┘       (one mpsc)          │        manual conflicts    │
//!                                            └─────────────┬──────────────┘
//!                                 every tick, if idle      │
//!                                                          ▼
//!                                      ┌────────────────────────────────┐
//!                                      │  batch task                    │
//!                                      │  buffer_unordered(max_conc.)   │
//!                                      │    SyncWorker::process(unit)   │
//!                                      └───────────────┬────────────────┘
//!                                                      │ Vec<UnitReport>
//!                                                      ▼
//!                                   apply reports → persist → events
//! ```
//!
//! Only the orchestrator touches the state. At most one batch is in flight,
//! and the state is saved between batches.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backup::{BackupManager, BackupStorage, SweepReport};
use crate::config::{RemoteBackend, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::events::{EngineEvent, EVENT_CHANNEL_CAPACITY};
use crate::local::{LocalFs, LocalTree, PathFilter};
use crate::notifier::{spawn_forwarder, FanoutNotifier, Notifier, TracingNotifier, WebhookNotifier};
use crate::poller::{PollerHandle, RemotePoller};
use crate::queue::{QueueEntry, SyncQueue, WorkUnit};
use crate::remote::{MemoryRemote, RemoteDocumentApi, WikiJsClient};
use crate::resolver::Resolver;
use crate::state::{JsonStateFile, StateStorage};
use crate::transfer::Transfer;
use crate::watcher::{LocalWatcher, WatcherHandle};
use crate::worker::{SyncWorker, UnitOutcome, UnitReport};
use wikisync_core::{
    is_unchanged, Backup, ChangeKind, Conflict, ItemStatus, Resolution, Side, StateSnapshot,
    SyncItem, SyncKey, SyncStateRecord,
};
use wikisync_db::BackupStore;

// =============================================================================
// Messages
// =============================================================================

/// Everything the orchestrator receives, on one channel so that a command
/// sent after a rescan is seen after the rescan's changes.
#[derive(Debug)]
pub enum EngineMessage {
    Change(SyncItem),
    /// Every document key the local tree holds right now.
    LocalListing(Vec<SyncKey>),
    /// A poll cycle finished. `present` is every key the remote holds.
    PollCompleted {
        cursor: Option<DateTime<Utc>>,
        present: Vec<SyncKey>,
    },
    PollFailed(String),
    Command(EngineCommand),
}

/// Operator requests.
#[derive(Debug)]
pub enum EngineCommand {
    Status(oneshot::Sender<EngineStatus>),
    ListConflicts(oneshot::Sender<Vec<Conflict>>),
    Resolve {
        id: Uuid,
        resolution: Resolution,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    /// Replies once the queue is empty and no batch is in flight.
    Drain(oneshot::Sender<()>),
    /// Finishes the in-flight batch, saves the state and exits.
    Stop(oneshot::Sender<()>),
}

/// Snapshot of engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub queue_depth: usize,
    pub conflict_count: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Units in the current batch.
    pub in_flight: usize,
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct OrchestratorSettings {
    batch_size: usize,
    max_concurrent: usize,
    tick: Duration,
    sweep_interval: Duration,
    retention: chrono::Duration,
}

#[derive(Debug, Default)]
struct BatchTally {
    processed: usize,
    synced: usize,
    conflicts: usize,
    failed: usize,
}

struct Orchestrator {
    state: StateSnapshot,
    queue: SyncQueue,
    worker: Arc<SyncWorker>,
    state_store: Arc<dyn StateStorage>,
    backups: BackupManager,
    events: broadcast::Sender<EngineEvent>,
    rx: mpsc::Receiver<EngineMessage>,
    settings: OrchestratorSettings,

    in_flight: Option<JoinHandle<Vec<UnitReport>>>,
    /// Copies of the in-flight entries, in case the batch task dies.
    in_flight_entries: Vec<QueueEntry>,
    /// Failed entries, re-queued after the next listing or poll.
    deferred: Vec<QueueEntry>,
    /// Newest remote cursor reported, committed once everything is applied.
    pending_cursor: Option<DateTime<Utc>>,
    drain_waiters: Vec<oneshot::Sender<()>>,
}

impl Orchestrator {
    async fn run(mut self) {
        info!(
            records = self.state.records.len(),
            conflicts = self.state.conflicts.len(),
            "Orchestrator starting"
        );

        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let sweep_period = self.settings.sweep_interval;
        let mut sweeper = interval_at(Instant::now() + sweep_period, sweep_period);
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(EngineMessage::Command(EngineCommand::Stop(reply))) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(message) => self.handle(message).await,
                    None => {
                        warn!("Engine channel closed without stop");
                        self.shutdown().await;
                        break;
                    }
                },

                result = join_in_flight(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.finish_batch(result).await;
                }

                _ = ticker.tick() => self.maybe_start_batch(),

                _ = sweeper.tick() => self.sweep().await,
            }
        }

        info!("Orchestrator stopped");
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_none()
    }

    async fn handle(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Change(item) => self.enqueue(item),

            EngineMessage::LocalListing(keys) => {
                self.enqueue_missing(Side::Local, keys);
                self.requeue_deferred();
            }

            EngineMessage::PollCompleted { cursor, present } => {
                self.enqueue_missing(Side::Remote, present);
                if cursor.is_some() {
                    self.pending_cursor = cursor.max(self.pending_cursor);
                }
                self.requeue_deferred();
                if self.is_idle() && self.commit_cursor() {
                    self.persist().await;
                }
            }

            EngineMessage::PollFailed(message) => {
                self.emit(EngineEvent::PollFailed { message });
            }

            EngineMessage::Command(command) => self.handle_command(command).await,
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Status(reply) => {
                let _ = reply.send(EngineStatus {
                    running: true,
                    queue_depth: self.queue.len(),
                    conflict_count: self.state.conflicts.len(),
                    last_sync_time: self.state.last_sync_at,
                    in_flight: self.in_flight_entries.len(),
                });
            }

            EngineCommand::ListConflicts(reply) => {
                let _ = reply.send(self.state.conflicts.clone());
            }

            EngineCommand::Resolve {
                id,
                resolution,
                reply,
            } => {
                let result = self.resolve(id, resolution);
                if result.is_ok() && self.in_flight.is_none() {
                    self.persist().await;
                }
                let _ = reply.send(result);
            }

            EngineCommand::Drain(reply) => {
                if self.is_idle() {
                    let _ = reply.send(());
                } else {
                    self.drain_waiters.push(reply);
                    self.maybe_start_batch();
                }
            }

            // Handled by the run loop
            EngineCommand::Stop(reply) => {
                let _ = reply.send(());
            }
        }
    }

    // =========================================================================
    // Queue Intake
    // =========================================================================

    fn enqueue(&mut self, item: SyncItem) {
        if is_unchanged(self.state.record(&item.key), &item) {
            debug!(key = %item.key, side = %item.side, "Change matches last sync, dropped");
            return;
        }
        debug!(key = %item.key, side = %item.side, kind = %item.change_kind, "Change queued");
        self.queue.push(QueueEntry::observed(item));
    }

    /// Queues deletions for keys the state says `side` holds but the
    /// listing does not.
    fn enqueue_missing(&mut self, side: Side, listing: Vec<SyncKey>) {
        let present: HashSet<SyncKey> = listing.into_iter().collect();
        let missing: Vec<SyncKey> = self
            .state
            .known_keys(side)
            .filter(|key| !present.contains(*key))
            .cloned()
            .collect();

        for key in missing {
            self.enqueue(SyncItem::deleted(key, side));
        }
    }

    fn requeue_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        debug!(entries = self.deferred.len(), "Retrying failed entries");
        for mut entry in std::mem::take(&mut self.deferred) {
            entry.item.status = ItemStatus::Pending;
            self.queue.push(entry);
        }
    }

    // =========================================================================
    // Batches
    // =========================================================================

    fn maybe_start_batch(&mut self) {
        if self.in_flight.is_some() || self.queue.is_empty() {
            return;
        }

        let units = self.queue.take_batch(self.settings.batch_size);
        let jobs: Vec<(WorkUnit, Option<SyncStateRecord>)> = units
            .into_iter()
            .map(|unit| {
                let record = self.state.record(&unit.key).cloned();
                (unit, record)
            })
            .collect();

        self.in_flight_entries = jobs
            .iter()
            .flat_map(|(unit, _)| unit.clone().into_entries(ItemStatus::InFlight))
            .collect();
        debug!(units = jobs.len(), "Starting batch");

        let worker = self.worker.clone();
        let max_concurrent = self.settings.max_concurrent;
        self.in_flight = Some(tokio::spawn(async move {
            stream::iter(jobs)
                .map(|(unit, record)| {
                    let worker = worker.clone();
                    async move { worker.process(unit, record).await }
                })
                .buffer_unordered(max_concurrent)
                .collect::<Vec<_>>()
                .await
        }));
    }

    async fn finish_batch(&mut self, result: Result<Vec<UnitReport>, JoinError>) {
        let entries = std::mem::take(&mut self.in_flight_entries);
        let mut tally = BatchTally::default();

        match result {
            Ok(reports) => {
                for report in reports {
                    self.apply(report, &mut tally);
                }
            }
            Err(e) => {
                error!(?e, "Batch task failed");
                tally.failed = entries.len();
                self.emit(EngineEvent::SyncFailed {
                    key: None,
                    message: format!("batch task failed: {}", e),
                    retryable: true,
                });
                self.deferred.extend(entries.into_iter().map(|mut entry| {
                    entry.item.status = ItemStatus::Failed;
                    entry
                }));
            }
        }

        self.state.last_sync_at = Some(Utc::now());
        if self.is_idle() {
            self.commit_cursor();
        }
        self.persist().await;

        info!(
            processed = tally.processed,
            synced = tally.synced,
            conflicts = tally.conflicts,
            failed = tally.failed,
            "Batch completed"
        );
        self.emit(EngineEvent::BatchCompleted {
            processed: tally.processed,
            synced: tally.synced,
            conflicts: tally.conflicts,
            failed: tally.failed,
        });

        if self.drain_waiters.is_empty() {
            return;
        }
        if self.queue.is_empty() {
            for waiter in self.drain_waiters.drain(..) {
                let _ = waiter.send(());
            }
        } else {
            self.maybe_start_batch();
        }
    }

    fn apply(&mut self, report: UnitReport, tally: &mut BatchTally) {
        let UnitReport { unit, outcome } = report;
        let key = unit.key.clone();
        tally.processed += 1;

        match outcome {
            UnitOutcome::Synced {
                record,
                from,
                change,
            } => {
                let hash = record.last_synced_hash;
                self.record(record);
                tally.synced += 1;
                self.emit(EngineEvent::ItemSynced {
                    key,
                    from,
                    change,
                    hash,
                    completed_at: Utc::now(),
                });
            }

            UnitOutcome::Converged { record } => {
                debug!(key = %key, "Sides already agree");
                self.record(record);
            }

            UnitOutcome::Unchanged => {}

            UnitOutcome::AutoResolved {
                conflict,
                winner,
                record,
            } => {
                let hash = record.last_synced_hash;
                let change = record.last_change_kind;
                self.record(record);
                tally.conflicts += 1;
                tally.synced += 1;

                info!(key = %key, kind = %conflict.kind, %winner, "Conflict resolved automatically");
                self.emit(EngineEvent::ConflictDetected {
                    id: conflict.id,
                    key: key.clone(),
                    kind: conflict.kind,
                    automatic: true,
                });
                self.emit(EngineEvent::ConflictResolved {
                    id: conflict.id,
                    key: key.clone(),
                    resolution: Resolution::for_winner(winner),
                    automatic: true,
                });
                self.emit(EngineEvent::ItemSynced {
                    key,
                    from: winner,
                    change,
                    hash,
                    completed_at: Utc::now(),
                });
            }

            UnitOutcome::Manual { conflict } => {
                let kind = conflict.kind;
                let queued = self.state.queue_conflict(conflict);
                let id = queued.id();
                if !queued.is_news() {
                    debug!(key = %key, %kind, %id, "Conflict already queued");
                    return;
                }
                tally.conflicts += 1;

                warn!(key = %key, %kind, %id, "Conflict needs an operator");
                self.emit(EngineEvent::ConflictDetected {
                    id,
                    key,
                    kind,
                    automatic: false,
                });
            }

            UnitOutcome::Failed { error } => {
                tally.failed += 1;
                self.emit(EngineEvent::SyncFailed {
                    key: Some(key),
                    message: error.to_string(),
                    retryable: error.is_retryable(),
                });
                self.deferred.extend(unit.into_entries(ItemStatus::Failed));
            }
        }
    }

    fn record(&mut self, record: SyncStateRecord) {
        self.state.clear_conflicts_for(&record.key);
        self.state.upsert(record);
    }

    /// Moves the pending cursor into the state once nothing reported by
    /// earlier polls is left to apply. Returns true if the state changed.
    fn commit_cursor(&mut self) -> bool {
        if !self.deferred.is_empty() {
            return false;
        }
        let Some(cursor) = self.pending_cursor.take() else {
            return false;
        };
        let before = self.state.remote_cursor;
        self.state.advance_cursor(cursor);
        before != self.state.remote_cursor
    }

    // =========================================================================
    // Manual Resolution
    // =========================================================================

    fn resolve(&mut self, id: Uuid, resolution: Resolution) -> SyncResult<()> {
        let conflict = self
            .state
            .take_conflict(id)
            .ok_or(SyncError::ConflictNotFound(id))?;
        let key = conflict.key.clone();

        match resolution.winner() {
            Some(winner) => {
                let mut item = conflict
                    .item(winner)
                    .cloned()
                    .unwrap_or_else(|| SyncItem::deleted(key.clone(), winner));
                item.status = ItemStatus::Pending;
                item.observed_at = Utc::now();
                self.queue.push(QueueEntry::forced(item));
            }
            None => {
                let local = conflict.hash(Side::Local);
                let remote = conflict.hash(Side::Remote);
                let change = conflict
                    .item(Side::Local)
                    .map_or(ChangeKind::Deleted, |item| item.change_kind);
                let record = if local == remote {
                    SyncStateRecord::converged(key.clone(), local, Side::Local, change)
                } else {
                    SyncStateRecord::diverged(key.clone(), local, remote, Side::Local, change)
                };
                self.state.upsert(record);
            }
        }

        info!(key = %key, %id, %resolution, "Conflict resolved by operator");
        self.emit(EngineEvent::ConflictResolved {
            id,
            key,
            resolution,
            automatic: false,
        });
        Ok(())
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    async fn persist(&mut self) {
        if let Err(e) = self.state_store.save(&self.state).await {
            error!(?e, "Failed to save sync state");
            self.emit(EngineEvent::SyncFailed {
                key: None,
                message: e.to_string(),
                retryable: e.is_retryable(),
            });
        }
    }

    /// Prunes expired tombstones, then sweeps backups in the background.
    async fn sweep(&mut self) {
        let cutoff = Utc::now() - self.settings.retention;
        let queue = &self.queue;
        let pending: HashSet<&SyncKey> = self
            .in_flight_entries
            .iter()
            .chain(&self.deferred)
            .map(|entry| &entry.item.key)
            .collect();
        let pruned = self.state.prune_tombstones(cutoff, |key| {
            pending.contains(key)
                || queue.contains(Side::Local, key)
                || queue.contains(Side::Remote, key)
        });
        if pruned > 0 {
            info!(pruned, "Expired tombstones pruned");
            if self.in_flight.is_none() {
                self.persist().await;
            }
        }
        self.spawn_sweep();
    }

    fn spawn_sweep(&self) {
        let backups = self.backups.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match backups.sweep().await {
                Ok(report) => {
                    let _ = events.send(EngineEvent::BackupsSwept {
                        deleted: report.deleted,
                        kept: report.kept,
                    });
                }
                Err(e) => warn!(?e, "Backup retention sweep failed"),
            }
        });
    }

    async fn shutdown(&mut self) {
        if let Some(task) = self.in_flight.take() {
            info!(units = self.in_flight_entries.len(), "Waiting for in-flight batch");
            let result = task.await;
            self.finish_batch(result).await;
        } else {
            self.persist().await;
        }
        // Waiters see the closed reply channel
        self.drain_waiters.clear();
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

async fn join_in_flight(
    task: &mut Option<JoinHandle<Vec<UnitReport>>>,
) -> Result<Vec<UnitReport>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

struct RunningEngine {
    tx: mpsc::Sender<EngineMessage>,
    orchestrator: JoinHandle<()>,
    watcher: WatcherHandle,
    poller: PollerHandle,
    forwarder: JoinHandle<()>,
}

/// Bidirectional sync between a local tree and a remote wiki.
///
/// ## Example
/// ```rust,no_run
/// use wikisync_engine::{SyncConfig, SyncEngine};
///
/// # async fn example() -> wikisync_engine::SyncResult<()> {
/// let config = SyncConfig::load(None)?;
/// let mut engine = SyncEngine::builder(config).build();
/// engine.start().await?;
/// engine.sync_now().await?;
/// engine.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    local: Option<Arc<dyn LocalFs>>,
    remote: Option<Arc<dyn RemoteDocumentApi>>,
    state_store: Option<Arc<dyn StateStorage>>,
    backup_storage: Option<Arc<dyn BackupStorage>>,
    notifier: Option<Arc<dyn Notifier>>,
    events: broadcast::Sender<EngineEvent>,
    running: Option<RunningEngine>,
}

impl SyncEngine {
    pub fn builder(config: SyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Receives every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Loads the state, then starts the orchestrator, watcher and poller.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.running.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        self.config.check_required()?;
        let root = self
            .config
            .local
            .root
            .clone()
            .ok_or_else(|| SyncError::config("local.root", "required"))?;
        if !root.is_dir() {
            return Err(SyncError::config(
                "local.root",
                format!("{} is not a directory", root.display()),
            ));
        }
        if let Some(dir) = &self.config.backup.dir {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                SyncError::config("backup.dir", format!("cannot create {}: {}", dir.display(), e))
            })?;
        }

        let local = self.local_fs()?;
        let remote = self.remote_api()?;
        let state_store = self.state_storage()?;
        let backup_storage = self.backup_storage().await?;
        let notifier = self.notifier()?;

        let forwarder = spawn_forwarder(self.events.subscribe(), notifier);

        let state = match state_store.load().await {
            Ok(Some(state)) => state,
            Ok(None) => StateSnapshot::default(),
            Err(e @ SyncError::StateLoad { .. }) => {
                error!(?e, "Sync state unreadable, starting from empty state");
                let quarantined_to = state_store.quarantine().await.unwrap_or_else(|qe| {
                    warn!(?qe, "Could not move unreadable state aside");
                    None
                });
                let _ = self.events.send(EngineEvent::StateLoadFailed {
                    message: e.to_string(),
                    quarantined_to,
                });
                StateSnapshot::default()
            }
            Err(e) => {
                forwarder.abort();
                return Err(e);
            }
        };

        let backups = BackupManager::new(
            backup_storage,
            local.clone(),
            remote.clone(),
            self.config.retention(),
        );
        let transfer = Transfer::new(local.clone(), remote.clone(), backups.clone());
        let resolver = Resolver::new(
            self.config.conflicts.policy(),
            self.config.conflicts.backup_on_resolve,
            transfer.clone(),
        );
        let worker = Arc::new(SyncWorker::new(transfer, resolver));

        let cursor = state.remote_cursor;
        let known_remote: Vec<SyncKey> = state.known_keys(Side::Remote).cloned().collect();

        let (tx, rx) = mpsc::channel(self.config.engine.channel_capacity);
        let orchestrator = Orchestrator {
            state,
            queue: SyncQueue::new(),
            worker,
            state_store,
            backups,
            events: self.events.clone(),
            rx,
            settings: OrchestratorSettings {
                batch_size: self.config.engine.batch_size,
                max_concurrent: self.config.engine.max_concurrent,
                tick: self.config.tick_interval(),
                sweep_interval: self.config.sweep_interval(),
                retention: self.config.retention(),
            },
            in_flight: None,
            in_flight_entries: Vec::new(),
            deferred: Vec::new(),
            pending_cursor: None,
            drain_waiters: Vec::new(),
        };
        let orchestrator = tokio::spawn(orchestrator.run());

        let watcher = LocalWatcher::new(
            local,
            root,
            PathFilter::from_settings(&self.config.local),
            self.config.debounce(),
            tx.clone(),
        );
        let watcher = match watcher.spawn(self.config.local.watch) {
            Ok(handle) => handle,
            Err(e) => {
                let (stop_tx, stop_rx) = oneshot::channel();
                let _ = tx.send(EngineMessage::Command(EngineCommand::Stop(stop_tx))).await;
                let _ = stop_rx.await;
                let _ = orchestrator.await;
                forwarder.abort();
                return Err(e);
            }
        };

        let poller = RemotePoller::new(
            remote,
            tx.clone(),
            self.config.poll_interval(),
            cursor,
            known_remote,
        )
        .spawn(self.config.remote.poll);

        self.running = Some(RunningEngine {
            tx,
            orchestrator,
            watcher,
            poller,
            forwarder,
        });

        info!(
            watch = self.config.local.watch,
            poll = self.config.remote.poll,
            backend = %self.config.remote.backend,
            "Sync engine started"
        );
        let _ = self.events.send(EngineEvent::Started);
        Ok(())
    }

    /// Stops the sources, lets the in-flight batch finish and saves the
    /// state. Does nothing when not running.
    pub async fn stop(&mut self) -> SyncResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        info!("Sync engine stopping");

        running.watcher.shutdown().await;
        running.poller.shutdown().await;

        let (tx, rx) = oneshot::channel();
        if running
            .tx
            .send(EngineMessage::Command(EngineCommand::Stop(tx)))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        if let Err(e) = running.orchestrator.await {
            error!(?e, "Orchestrator task ended abnormally");
        }

        let _ = self.events.send(EngineEvent::Stopped);
        if let Err(e) = running.forwarder.await {
            warn!(?e, "Notification forwarder ended abnormally");
        }

        info!("Sync engine stopped");
        Ok(())
    }

    pub async fn status(&self) -> SyncResult<EngineStatus> {
        let Some(running) = &self.running else {
            return Ok(EngineStatus::default());
        };
        let (tx, rx) = oneshot::channel();
        Self::command(running, EngineCommand::Status(tx)).await?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Conflicts waiting for an operator. Reads the state file when the
    /// engine is not running.
    pub async fn list_conflicts(&self) -> SyncResult<Vec<Conflict>> {
        match &self.running {
            Some(running) => {
                let (tx, rx) = oneshot::channel();
                Self::command(running, EngineCommand::ListConflicts(tx)).await?;
                rx.await.map_err(|_| SyncError::ShuttingDown)
            }
            None => Ok(self
                .state_storage()?
                .load()
                .await?
                .map(|state| state.conflicts)
                .unwrap_or_default()),
        }
    }

    /// Resolves a queued conflict. USE_LOCAL / USE_REMOTE are applied by the
    /// next batch; SKIP takes effect immediately.
    pub async fn resolve_conflict(&self, id: Uuid, resolution: Resolution) -> SyncResult<()> {
        let running = self.running.as_ref().ok_or(SyncError::NotRunning)?;
        let (reply, rx) = oneshot::channel();
        Self::command(
            running,
            EngineCommand::Resolve {
                id,
                resolution,
                reply,
            },
        )
        .await?;
        rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// Rescans the local tree, polls the remote, and waits until every
    /// resulting change has been processed.
    pub async fn sync_now(&self) -> SyncResult<()> {
        let running = self.running.as_ref().ok_or(SyncError::NotRunning)?;

        let documents = running.watcher.rescan().await?;
        if let Err(e) = running.poller.poll_now().await {
            warn!(?e, "Remote poll failed during sync");
        }
        debug!(documents, "Waiting for queue to drain");

        Self::drain(running).await
    }

    /// Runs a backup retention sweep now. When the engine is stopped,
    /// expired tombstones are pruned from the state file as well.
    pub async fn sweep_backups(&mut self) -> SyncResult<SweepReport> {
        let report = self.backup_manager().await?.sweep().await?;

        if self.running.is_none() {
            if let Err(e) = self.prune_tombstones().await {
                warn!(?e, "Could not prune tombstones from the saved state");
            }
        }

        let _ = self.events.send(EngineEvent::BackupsSwept {
            deleted: report.deleted,
            kept: report.kept,
        });
        Ok(report)
    }

    async fn prune_tombstones(&self) -> SyncResult<usize> {
        let store = self.state_storage()?;
        let Some(mut state) = store.load().await? else {
            return Ok(0);
        };
        let pruned = state.prune_tombstones(Utc::now() - self.config.retention(), |_| false);
        if pruned > 0 {
            info!(pruned, "Expired tombstones pruned");
            store.save(&state).await?;
        }
        Ok(pruned)
    }

    /// Checks that a backup's stored bytes still match its recorded digest.
    pub async fn verify_backup(&mut self, id: Uuid) -> SyncResult<Backup> {
        self.backup_manager().await?.verify(id).await
    }

    /// Writes a backup back to the side it was taken from, after backing up
    /// what that side holds now. The restored content reaches the other side
    /// with the next sync pass.
    pub async fn restore_backup(&mut self, id: Uuid) -> SyncResult<Backup> {
        let backups = self.backup_manager().await?;
        let transfer = Transfer::new(self.local_fs()?, self.remote_api()?, backups);

        let (backup, written) = transfer.restore(id).await?;
        if written {
            let _ = self.events.send(EngineEvent::BackupRestored {
                id,
                key: backup.key.clone(),
                side: backup.side,
            });
        }
        Ok(backup)
    }

    async fn drain(running: &RunningEngine) -> SyncResult<()> {
        let (tx, rx) = oneshot::channel();
        Self::command(running, EngineCommand::Drain(tx)).await?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    async fn command(running: &RunningEngine, command: EngineCommand) -> SyncResult<()> {
        running
            .tx
            .send(EngineMessage::Command(command))
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    // =========================================================================
    // Adapters from configuration
    // =========================================================================

    fn local_fs(&mut self) -> SyncResult<Arc<dyn LocalFs>> {
        if let Some(local) = &self.local {
            return Ok(local.clone());
        }
        let local: Arc<dyn LocalFs> = Arc::new(LocalTree::from_settings(&self.config.local)?);
        self.local = Some(local.clone());
        Ok(local)
    }

    fn remote_api(&mut self) -> SyncResult<Arc<dyn RemoteDocumentApi>> {
        if let Some(remote) = &self.remote {
            return Ok(remote.clone());
        }
        let remote: Arc<dyn RemoteDocumentApi> = match self.config.remote.backend {
            RemoteBackend::WikiJs => Arc::new(WikiJsClient::from_settings(&self.config.remote)?),
            RemoteBackend::Memory => {
                warn!("Using the in-memory remote; nothing reaches a wiki");
                Arc::new(MemoryRemote::new())
            }
        };
        self.remote = Some(remote.clone());
        Ok(remote)
    }

    fn state_storage(&self) -> SyncResult<Arc<dyn StateStorage>> {
        if let Some(store) = &self.state_store {
            return Ok(store.clone());
        }
        let path = self
            .config
            .engine
            .state_path
            .clone()
            .ok_or_else(|| SyncError::config("engine.state_path", "required"))?;
        Ok(Arc::new(JsonStateFile::new(path)))
    }

    async fn backup_storage(&mut self) -> SyncResult<Arc<dyn BackupStorage>> {
        if let Some(storage) = &self.backup_storage {
            return Ok(storage.clone());
        }
        let dir = self
            .config
            .backup
            .dir
            .clone()
            .ok_or_else(|| SyncError::config("backup.dir", "required"))?;
        let storage: Arc<dyn BackupStorage> = Arc::new(BackupStore::open(dir).await?);
        self.backup_storage = Some(storage.clone());
        Ok(storage)
    }

    async fn backup_manager(&mut self) -> SyncResult<BackupManager> {
        let local = self.local_fs()?;
        let remote = self.remote_api()?;
        let storage = self.backup_storage().await?;
        Ok(BackupManager::new(storage, local, remote, self.config.retention()))
    }

    fn notifier(&mut self) -> SyncResult<Arc<dyn Notifier>> {
        if let Some(notifier) = &self.notifier {
            return Ok(notifier.clone());
        }
        let notifier: Arc<dyn Notifier> = match &self.config.notify.webhook_url {
            Some(url) => {
                let webhook = WebhookNotifier::new(
                    url.clone(),
                    Duration::from_secs(self.config.notify.webhook_timeout_secs),
                )?;
                Arc::new(FanoutNotifier::new(vec![
                    Arc::new(TracingNotifier),
                    Arc::new(webhook),
                ]))
            }
            None => Arc::new(TracingNotifier),
        };
        self.notifier = Some(notifier.clone());
        Ok(notifier)
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`SyncEngine`]. Adapters not supplied are created from the
/// configuration when the engine starts.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    local: Option<Arc<dyn LocalFs>>,
    remote: Option<Arc<dyn RemoteDocumentApi>>,
    state_store: Option<Arc<dyn StateStorage>>,
    backup_storage: Option<Arc<dyn BackupStorage>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl SyncEngineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncEngineBuilder {
            config,
            local: None,
            remote: None,
            state_store: None,
            backup_storage: None,
            notifier: None,
        }
    }

    pub fn with_local(mut self, local: Arc<dyn LocalFs>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteDocumentApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_state_storage(mut self, store: Arc<dyn StateStorage>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn with_backup_storage(mut self, storage: Arc<dyn BackupStorage>) -> Self {
        self.backup_storage = Some(storage);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> SyncEngine {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        SyncEngine {
            config: Arc::new(self.config),
            local: self.local,
            remote: self.remote,
            state_store: self.state_store,
            backup_storage: self.backup_storage,
            notifier: self.notifier,
            events,
            running: None,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
