//! # wikisync-db: Backup Catalog for wikisync
//!
//! Every destructive write the engine performs is preceded by a backup. This
//! crate stores them: a SQLite catalog of backup rows and a content-addressed
//! blob directory with the bytes.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        wikisync Data Flow                               │
//! │                                                                         │
//! │  Transfer worker (about to overwrite remote "a.md")                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   wikisync-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  BackupStore  │    │  Repository   │    │  Migrations  │  │   │
//! │  │   │  (store.rs)   │───►│ (backup.rs)   │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ store / read  │    │ catalog rows  │    │ 001_backup_  │  │   │
//! │  │   │ delete / list │    │ retention     │    │   catalog    │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │                                                     │   │
//! │  │           ▼                                                     │   │
//! │  │   ┌───────────────┐                                             │   │
//! │  │   │   BlobStore   │  objects/<2 hex>/<62 hex>                   │   │
//! │  │   └───────────────┘                                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Catalog queries
//! - [`blob`] - Content-addressed blob files
//! - [`store`] - Catalog plus blobs behind one handle
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wikisync_db::BackupStore;
//! use wikisync_core::{BackupReason, Side, SyncKey};
//!
//! let store = BackupStore::open("/var/lib/wikisync/backups").await?;
//! let key = SyncKey::new("notes/a.md")?;
//! let backup = store.store(&key, Side::Remote, BackupReason::RoutineSync, b"old").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod blob;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use blob::BlobStore;
pub use error::{DbError, DbResult};
pub use pool::{CatalogHealth, Database, DbConfig};
pub use repository::backup::BackupRepository;
pub use store::BackupStore;
