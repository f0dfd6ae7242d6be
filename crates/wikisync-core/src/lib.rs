//! # wikisync-core: Pure Sync Decision Logic
//!
//! This crate holds every decision the synchronizer makes, as pure functions
//! over plain data. Nothing here touches the filesystem, the network or a clock
//! beyond stamping new values.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        wikisync Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    wikisync CLI (apps/cli)                      │   │
//! │  │        run, sync --once, status, conflicts, resolve, backups   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    wikisync-engine                              │   │
//! │  │   Watcher ─► Queue ─► Orchestrator ─► Transfer / Resolver       │   │
//! │  │   Poller  ─┘                                                    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ wikisync-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌───────────┐ ┌──────────┐        │   │
//! │  │   │  types   │ │   key    │ │ detection │ │  policy  │        │   │
//! │  │   │ SyncItem │ │ SyncKey  │ │ classify  │ │ decide   │        │   │
//! │  │   │ Conflict │ │ page map │ │ Verdict   │ │ winner   │        │   │
//! │  │   └──────────┘ └──────────┘ └───────────┘ └──────────┘        │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  wikisync-db (Backup Catalog)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Data model (SyncItem, SyncStateRecord, Conflict, Backup)
//! - [`key`] - Key naming rule and page path mapping
//! - [`hashing`] - SHA-256 content hashes
//! - [`detection`] - Conflict detector decision table
//! - [`policy`] - Automatic vs manual resolution
//! - [`state`] - Persisted state snapshot
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use wikisync_core::detection::{classify, SideState, Verdict};
//! use wikisync_core::hashing::ContentHash;
//! use wikisync_core::types::ConflictKind;
//!
//! // Both sides edited a key that had never been synced
//! let local = SideState::File(ContentHash::of(b"mine"));
//! let remote = SideState::File(ContentHash::of(b"theirs"));
//!
//! assert_eq!(
//!     classify(None, local, remote),
//!     Verdict::Conflict(ConflictKind::ConcurrentModify)
//! );
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod detection;
pub mod error;
pub mod hashing;
pub mod key;
pub mod policy;
pub mod state;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use detection::{classify, is_unchanged, SideState, Verdict};
pub use error::{CoreError, CoreResult, ValidationError};
pub use hashing::ContentHash;
pub use key::SyncKey;
pub use policy::{most_recent, Decision, ResolutionPolicy};
pub use state::{Queued, StateSnapshot};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest document synchronized by default (10 MiB).
///
/// Anything bigger is almost certainly not a wiki page.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
