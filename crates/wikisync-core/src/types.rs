//! # Domain Types
//!
//! Core domain types used throughout wikisync.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    SyncItem     │   │ SyncStateRecord │   │    Conflict     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  key            │   │  key            │   │  id (UUID)      │       │
//! │  │  content_hash   │   │  last_synced_*  │   │  key            │       │
//! │  │  side, kind     │   │  local_hash     │   │  local_item?    │       │
//! │  │  observed_at    │   │  remote_hash    │   │  remote_item?   │       │
//! │  │  status         │   │  last_side      │   │  kind           │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Side       │   │   ChangeKind    │   │     Backup      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Local          │   │  Created        │   │  id, key, side  │       │
//! │  │  Remote         │   │  Modified       │   │  content_ref    │       │
//! │  └─────────────────┘   │  Deleted        │   │  reason         │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifetimes
//! - `SyncItem` and `Conflict` are transient: they live in the engine's queues
//!   and retire once they produce a state record update or a backup.
//! - `SyncStateRecord` is durable: one per key, the single source of truth for
//!   what was last synchronized.
//! - `Backup` is immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;
use crate::hashing::ContentHash;
use crate::key::SyncKey;

// =============================================================================
// Side
// =============================================================================

/// One of the two independently mutating stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The local filesystem tree.
    Local,
    /// The remote document store (wiki).
    Remote,
}

impl Side {
    /// Returns the opposite side.
    #[inline]
    pub fn other(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for Side {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Side::Local),
            "remote" => Ok(Side::Remote),
            other => Err(CoreError::UnknownVariant {
                what: "side",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Change Kind / Shape / Status
// =============================================================================

/// What happened to an item on its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// The addressable shape of a key on one side.
///
/// Only files are synchronized. A directory showing up where a file used to be
/// cannot be expressed as a content diff and is classified as structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemShape {
    #[default]
    File,
    Directory,
}

/// Processing status of a queued item.
///
/// ```text
/// Pending ──► InFlight ──┬──► Done
///                        ├──► Failed      (re-detected next cycle)
///                        └──► Conflicted  (auto-resolved or manual queue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    InFlight,
    Done,
    Failed,
    Conflicted,
}

impl ItemStatus {
    /// Returns true once the item can no longer change status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Done | ItemStatus::Failed | ItemStatus::Conflicted
        )
    }
}

// =============================================================================
// Sync Item
// =============================================================================

/// The unit of synchronization: one observed change on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Stable identity shared by the local path and the remote page.
    pub key: SyncKey,
    /// Digest of the current bytes. `None` for deletions and directories.
    pub content_hash: Option<ContentHash>,
    /// Origin of the change.
    pub side: Side,
    /// What happened.
    pub change_kind: ChangeKind,
    /// File or directory.
    #[serde(default)]
    pub shape: ItemShape,
    /// When the change was detected (not when it happened).
    pub observed_at: DateTime<Utc>,
    /// Processing status.
    #[serde(default)]
    pub status: ItemStatus,
}

impl SyncItem {
    /// Creates a pending item observed now.
    pub fn new(
        key: SyncKey,
        side: Side,
        change_kind: ChangeKind,
        content_hash: Option<ContentHash>,
    ) -> Self {
        SyncItem {
            key,
            content_hash,
            side,
            change_kind,
            shape: ItemShape::File,
            observed_at: Utc::now(),
            status: ItemStatus::Pending,
        }
    }

    /// Creates a pending deletion observed now.
    pub fn deleted(key: SyncKey, side: Side) -> Self {
        Self::new(key, side, ChangeKind::Deleted, None)
    }

    /// Sets the observation timestamp.
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    /// Sets the shape.
    pub fn with_shape(mut self, shape: ItemShape) -> Self {
        self.shape = shape;
        self
    }

    /// Returns true if the item reports that its side no longer holds the key.
    #[inline]
    pub fn is_deletion(&self) -> bool {
        self.change_kind == ChangeKind::Deleted
    }

    /// Merges a newer observation of the same `(side, key)` into this one.
    ///
    /// The newer event's kind, hash, shape and timestamp win. A CREATED that is
    /// followed by a MODIFIED inside one queue window is still a creation.
    pub fn merge(&mut self, newer: SyncItem) {
        let change_kind = match (self.change_kind, newer.change_kind) {
            (ChangeKind::Created, ChangeKind::Modified) => ChangeKind::Created,
            (_, kind) => kind,
        };

        self.change_kind = change_kind;
        self.content_hash = newer.content_hash;
        self.shape = newer.shape;
        self.observed_at = newer.observed_at;
        self.status = ItemStatus::Pending;
    }
}

// =============================================================================
// Sync State Record
// =============================================================================

/// Durable per-key record of the last synchronization.
///
/// ## Baselines
/// `local_hash` and `remote_hash` are what each side held right after the last
/// sync. After every converging sync both equal `last_synced_hash`. They only
/// differ after a manual SKIP, where `last_synced_hash` is `None` and each side
/// keeps its own content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStateRecord {
    pub key: SyncKey,
    /// Hash present on both sides after the last converging sync.
    pub last_synced_hash: Option<ContentHash>,
    pub last_synced_at: DateTime<Utc>,
    /// Side whose change was last applied.
    pub last_side: Side,
    pub last_change_kind: ChangeKind,
    /// Local content right after the last sync (`None` = absent).
    pub local_hash: Option<ContentHash>,
    /// Remote content right after the last sync (`None` = absent).
    pub remote_hash: Option<ContentHash>,
}

impl SyncStateRecord {
    /// Record for a key that now holds `hash` on both sides (`None` = deleted on both).
    pub fn converged(
        key: SyncKey,
        hash: Option<ContentHash>,
        side: Side,
        change_kind: ChangeKind,
    ) -> Self {
        SyncStateRecord {
            key,
            last_synced_hash: hash,
            last_synced_at: Utc::now(),
            last_side: side,
            last_change_kind: change_kind,
            local_hash: hash,
            remote_hash: hash,
        }
    }

    /// Record for a key whose sides deliberately hold different content.
    pub fn diverged(
        key: SyncKey,
        local_hash: Option<ContentHash>,
        remote_hash: Option<ContentHash>,
        side: Side,
        change_kind: ChangeKind,
    ) -> Self {
        SyncStateRecord {
            key,
            last_synced_hash: None,
            last_synced_at: Utc::now(),
            last_side: side,
            last_change_kind: change_kind,
            local_hash,
            remote_hash,
        }
    }

    /// Returns the baseline hash of one side.
    #[inline]
    pub fn baseline(&self, side: Side) -> Option<ContentHash> {
        match side {
            Side::Local => self.local_hash,
            Side::Remote => self.remote_hash,
        }
    }

    /// Returns true when both sides agreed on content at the last sync.
    pub fn is_converged(&self) -> bool {
        self.local_hash == self.remote_hash && self.last_synced_hash == self.local_hash
    }

    /// Returns true for a record kept only to remember a propagated deletion.
    pub fn is_tombstone(&self) -> bool {
        self.local_hash.is_none() && self.remote_hash.is_none()
    }
}

// =============================================================================
// Conflict
// =============================================================================

/// How two sides disagree about a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed content since the last sync.
    ConcurrentModify,
    /// Local deleted the key while remote changed it.
    LocalDeleteRemoteModify,
    /// Remote deleted the key while local changed it.
    RemoteDeleteLocalModify,
    /// The key changed shape (file ↔ directory). Never auto-resolved.
    Structural,
}

impl ConflictKind {
    /// All kinds, in declaration order.
    pub const ALL: [ConflictKind; 4] = [
        ConflictKind::ConcurrentModify,
        ConflictKind::LocalDeleteRemoteModify,
        ConflictKind::RemoteDeleteLocalModify,
        ConflictKind::Structural,
    ];

    /// Returns true for the delete-versus-modify kinds.
    pub fn involves_deletion(&self) -> bool {
        matches!(
            self,
            ConflictKind::LocalDeleteRemoteModify | ConflictKind::RemoteDeleteLocalModify
        )
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::ConcurrentModify => write!(f, "concurrent_modify"),
            ConflictKind::LocalDeleteRemoteModify => write!(f, "local_delete_remote_modify"),
            ConflictKind::RemoteDeleteLocalModify => write!(f, "remote_delete_local_modify"),
            ConflictKind::Structural => write!(f, "structural"),
        }
    }
}

impl FromStr for ConflictKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "concurrent_modify" => Ok(ConflictKind::ConcurrentModify),
            "local_delete_remote_modify" => Ok(ConflictKind::LocalDeleteRemoteModify),
            "remote_delete_local_modify" => Ok(ConflictKind::RemoteDeleteLocalModify),
            "structural" => Ok(ConflictKind::Structural),
            other => Err(CoreError::UnknownVariant {
                what: "conflict kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A detected disagreement between the two sides about one key.
///
/// A missing item means that side deleted the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Uuid,
    pub key: SyncKey,
    pub local_item: Option<SyncItem>,
    pub remote_item: Option<SyncItem>,
    pub kind: ConflictKind,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Creates a conflict with a fresh id.
    pub fn new(
        key: SyncKey,
        kind: ConflictKind,
        local_item: Option<SyncItem>,
        remote_item: Option<SyncItem>,
    ) -> Self {
        Conflict {
            id: Uuid::new_v4(),
            key,
            local_item,
            remote_item,
            kind,
            detected_at: Utc::now(),
        }
    }

    /// Returns the item observed on one side.
    pub fn item(&self, side: Side) -> Option<&SyncItem> {
        match side {
            Side::Local => self.local_item.as_ref(),
            Side::Remote => self.remote_item.as_ref(),
        }
    }

    /// Returns the content hash a side held when the conflict was detected.
    pub fn hash(&self, side: Side) -> Option<ContentHash> {
        self.item(side).and_then(|item| item.content_hash)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Operator decision for a manually queued conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Local content (or local absence) wins.
    UseLocal,
    /// Remote content (or remote absence) wins.
    UseRemote,
    /// Keep both sides as they are and stop reporting this divergence.
    Skip,
}

impl Resolution {
    /// Returns the winning side, if the resolution transfers anything.
    pub fn winner(&self) -> Option<Side> {
        match self {
            Resolution::UseLocal => Some(Side::Local),
            Resolution::UseRemote => Some(Side::Remote),
            Resolution::Skip => None,
        }
    }

    /// Resolution that makes `side` win.
    pub fn for_winner(side: Side) -> Self {
        match side {
            Side::Local => Resolution::UseLocal,
            Side::Remote => Resolution::UseRemote,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::UseLocal => write!(f, "use_local"),
            Resolution::UseRemote => write!(f, "use_remote"),
            Resolution::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "use_local" | "local" => Ok(Resolution::UseLocal),
            "use_remote" | "remote" => Ok(Resolution::UseRemote),
            "skip" => Ok(Resolution::Skip),
            other => Err(CoreError::UnknownVariant {
                what: "resolution",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Backup
// =============================================================================

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupReason {
    /// Taken before a routine overwrite or delete of the target side.
    RoutineSync,
    /// Taken of both sides before a conflict resolution is applied.
    ConflictResolution,
}

impl fmt::Display for BackupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupReason::RoutineSync => write!(f, "routine_sync"),
            BackupReason::ConflictResolution => write!(f, "conflict_resolution"),
        }
    }
}

impl FromStr for BackupReason {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routine_sync" => Ok(BackupReason::RoutineSync),
            "conflict_resolution" => Ok(BackupReason::ConflictResolution),
            other => Err(CoreError::UnknownVariant {
                what: "backup reason",
                value: other.to_string(),
            }),
        }
    }
}

/// Immutable snapshot of one side's content taken before a destructive write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: Uuid,
    pub key: SyncKey,
    /// Which side's pre-write content was captured.
    pub side: Side,
    /// Digest of the stored bytes; also the blob address.
    pub content_ref: ContentHash,
    /// Size of the stored bytes.
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub reason: BackupReason,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> SyncKey {
        SyncKey::new(s).unwrap()
    }

    #[test]
    fn test_side_other() {
        assert_eq!(Side::Local.other(), Side::Remote);
        assert_eq!(Side::Remote.other(), Side::Local);
    }

    #[test]
    fn test_conflict_kind_parsing() {
        assert_eq!(
            "CONCURRENT_MODIFY".parse::<ConflictKind>().unwrap(),
            ConflictKind::ConcurrentModify
        );
        assert_eq!(
            "remote-delete-local-modify".parse::<ConflictKind>().unwrap(),
            ConflictKind::RemoteDeleteLocalModify
        );
        assert!("sideways".parse::<ConflictKind>().is_err());
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("use-local".parse::<Resolution>().unwrap(), Resolution::UseLocal);
        assert_eq!("USE_REMOTE".parse::<Resolution>().unwrap(), Resolution::UseRemote);
        assert_eq!("skip".parse::<Resolution>().unwrap(), Resolution::Skip);
        assert_eq!(Resolution::Skip.winner(), None);
    }

    #[test]
    fn test_merge_keeps_creation() {
        let mut queued = SyncItem::new(
            key("notes/a.md"),
            Side::Local,
            ChangeKind::Created,
            Some(ContentHash::of(b"v1")),
        );
        let newer = SyncItem::new(
            key("notes/a.md"),
            Side::Local,
            ChangeKind::Modified,
            Some(ContentHash::of(b"v2")),
        );

        queued.merge(newer);
        assert_eq!(queued.change_kind, ChangeKind::Created);
        assert_eq!(queued.content_hash, Some(ContentHash::of(b"v2")));
    }

    #[test]
    fn test_merge_deletion_wins() {
        let mut queued = SyncItem::new(
            key("a.md"),
            Side::Remote,
            ChangeKind::Modified,
            Some(ContentHash::of(b"v1")),
        );
        queued.merge(SyncItem::deleted(key("a.md"), Side::Remote));
        assert!(queued.is_deletion());
        assert_eq!(queued.content_hash, None);
    }

    #[test]
    fn test_record_baselines() {
        let h1 = ContentHash::of(b"one");
        let record = SyncStateRecord::converged(key("a.md"), Some(h1), Side::Local, ChangeKind::Created);
        assert_eq!(record.baseline(Side::Local), Some(h1));
        assert_eq!(record.baseline(Side::Remote), Some(h1));
        assert!(record.is_converged());

        let h2 = ContentHash::of(b"two");
        let skipped = SyncStateRecord::diverged(
            key("a.md"),
            Some(h1),
            Some(h2),
            Side::Local,
            ChangeKind::Modified,
        );
        assert!(!skipped.is_converged());
        assert_eq!(skipped.last_synced_hash, None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::InFlight.is_terminal());
        assert!(ItemStatus::Done.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(ItemStatus::Conflicted.is_terminal());
    }
}
