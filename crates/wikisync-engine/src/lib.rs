//! # wikisync-engine: Local ↔ Wiki.js Sync Engine
//!
//! Keeps a directory of Markdown documents and a Wiki.js instance in step.
//! Changes on either side are queued, classified against the last synced
//! state, and copied across. Conflicts are resolved by policy or held for
//! an operator. Every overwrite or deletion is preceded by a backup.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          wikisync Engine                                │
//! │                                                                         │
//! │  ┌────────────────┐                         ┌────────────────────────┐  │
//! │  │  LocalWatcher  │                         │     RemotePoller       │  │
//! │  │                │                         │                        │  │
//! │  │ notify events, │                         │ list_changed_since     │  │
//! │  │ debounced,     │                         │ (cursor) + key listing │  │
//! │  │ full rescans   │                         │ every poll interval    │  │
//! │  └───────┬────────┘                         └───────────┬────────────┘  │
//! │          │             EngineMessage (mpsc)             │               │
//! │          └──────────────────┬───────────────────────────┘               │
//! │                             ▼                                           │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  SyncEngine / Orchestrator                       │  │
//! │  │                                                                  │  │
//! │  │  SyncQueue (one entry per key and side) → batches of WorkUnits   │  │
//! │  │  StateSnapshot (records, conflicts, cursor) → StateStorage       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               ▼                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  SyncWorker    │  │   Resolver     │  │   Transfer             │    │
//! │  │                │  │                │  │                        │    │
//! │  │ observe both   │─►│ policy: auto   │─►│ backup, then write or  │    │
//! │  │ sides, classify│  │ or manual      │  │ delete on one side     │    │
//! │  └────────────────┘  └────────────────┘  └───────────┬────────────┘    │
//! │                                                      ▼                  │
//! │                           LocalFs  ·  RemoteDocumentApi  ·  BackupStorage│
//! │                                                                         │
//! │  EVENTS (broadcast): started, item synced, conflict detected/resolved,  │
//! │  sync failed, poll failed, batch completed, backups swept, stopped      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Orchestration
//! - [`engine`] - `SyncEngine`, its builder and the orchestrator task
//! - [`queue`] - Pending changes, merged per key and side
//! - [`worker`] - Processes one key: observe, classify, act
//! - [`resolver`] - Conflict policy and resolution
//! - [`transfer`] - Backed-up writes and deletions
//!
//! ### Change Sources
//! - [`watcher`] - Local filesystem events and rescans
//! - [`poller`] - Remote change polling
//!
//! ### Adapters
//! - [`local`] - Local document tree
//! - [`remote`] - Wiki.js GraphQL client and an in-memory remote
//! - [`state`] - Persistent sync state
//! - [`backup`] - Backup creation and retention
//! - [`notifier`] - Event notifications (log, webhook)
//!
//! ### Support
//! - [`config`] - Layered configuration
//! - [`error`] - Sync error types
//! - [`events`] - Engine events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wikisync_engine::{SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::load(None)?;
//! let mut engine = SyncEngine::builder(config).build();
//! engine.start().await?;
//!
//! let mut events = engine.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Orchestration
pub mod engine;
pub mod queue;
pub mod resolver;
pub mod transfer;
pub mod worker;

// Change sources
pub mod poller;
pub mod watcher;

// Adapters
pub mod backup;
pub mod local;
pub mod notifier;
pub mod remote;
pub mod state;

// Support
pub mod config;
pub mod error;
pub mod events;

// =============================================================================
// Re-exports
// =============================================================================

pub use backup::{BackupManager, BackupStorage, SweepReport};
pub use config::{RemoteBackend, SyncConfig};
pub use engine::{EngineStatus, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::EngineEvent;
pub use local::{LocalFs, LocalTree, PathFilter};
pub use notifier::{FanoutNotifier, Notification, Notifier, TracingNotifier, WebhookNotifier};
pub use remote::{MemoryRemote, RemoteDocumentApi, WikiJsClient};
pub use state::{JsonStateFile, StateStorage};
