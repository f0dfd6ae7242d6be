//! # Conflict Detection
//!
//! Classifies the current state of a key as a no-op, a converged state, a
//! clean one-sided change, or a conflict. Pure and read-only: the engine
//! queries both sides, then asks this module what to do.
//!
//! ## Decision Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Inputs: baselines (local_hash, remote_hash) from the state record     │
//! │          current local state, current remote state                     │
//! │                                                                         │
//! │  1. shape   DIR vs FILE, or DIR where its file used to be → STRUCTURAL │
//! │             DIR vs DIR, or DIR vs nothing (no history)   → no-op       │
//! │  2. equal   local == remote                              → converged   │
//! │  3. stable  local == base_l  AND remote == base_r        → no-op       │
//! │  4. clean   exactly one side moved off its baseline      → transfer    │
//! │  5. both    local absent   → LOCAL_DELETE_REMOTE_MODIFY                │
//! │             remote absent  → REMOTE_DELETE_LOCAL_MODIFY                │
//! │             both present   → CONCURRENT_MODIFY                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The table is symmetric: swapping the two sides swaps the verdict.

use serde::{Deserialize, Serialize};

use crate::hashing::ContentHash;
use crate::types::{ChangeKind, ConflictKind, ItemShape, Side, SyncItem, SyncStateRecord};

// =============================================================================
// Side State
// =============================================================================

/// What one side currently holds at a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "hash")]
pub enum SideState {
    /// Nothing at this key.
    Absent,
    /// A document with the given content hash.
    File(ContentHash),
    /// A directory (or remote folder) sits where a document could be.
    Directory,
}

impl SideState {
    /// Content hash if this is a file.
    pub fn hash(&self) -> Option<ContentHash> {
        match self {
            SideState::File(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Builds a state from an optional hash.
    pub fn from_hash(hash: Option<ContentHash>) -> Self {
        match hash {
            Some(hash) => SideState::File(hash),
            None => SideState::Absent,
        }
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        matches!(self, SideState::Directory)
    }

    #[inline]
    pub fn is_absent(&self) -> bool {
        matches!(self, SideState::Absent)
    }
}

// =============================================================================
// Verdict
// =============================================================================

/// Outcome of classifying one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Nothing to transfer and nothing to record.
    NoOp,
    /// Both sides already hold the same content; record it without transfer.
    Converged { hash: Option<ContentHash> },
    /// Only `from` changed since the last sync; copy it to the other side.
    Clean {
        from: Side,
        change: ChangeKind,
        hash: Option<ContentHash>,
    },
    /// Both sides changed, or the shape changed.
    Conflict(ConflictKind),
}

impl Verdict {
    /// Returns true if applying this verdict writes to a side.
    pub fn transfers(&self) -> bool {
        matches!(self, Verdict::Clean { .. })
    }
}

// =============================================================================
// Classifier
// =============================================================================

/// Classifies a key given its state record and the current state of both sides.
///
/// ## Example
/// ```rust
/// use wikisync_core::detection::{classify, SideState, Verdict};
/// use wikisync_core::hashing::ContentHash;
/// use wikisync_core::types::{ChangeKind, Side};
///
/// let h1 = ContentHash::of(b"first");
/// let verdict = classify(None, SideState::File(h1), SideState::Absent);
/// assert_eq!(
///     verdict,
///     Verdict::Clean { from: Side::Local, change: ChangeKind::Created, hash: Some(h1) }
/// );
/// ```
pub fn classify(
    record: Option<&SyncStateRecord>,
    local: SideState,
    remote: SideState,
) -> Verdict {
    let base_local = record.and_then(|r| r.local_hash);
    let base_remote = record.and_then(|r| r.remote_hash);

    // Rule 1: shape
    if local.is_directory() || remote.is_directory() {
        return match (local, remote) {
            (SideState::Directory, SideState::Directory) => Verdict::NoOp,
            (SideState::Directory, SideState::File(h)) => {
                shape_conflict(record, base_local, Some(h) == base_remote)
            }
            (SideState::File(h), SideState::Directory) => {
                shape_conflict(record, base_remote, Some(h) == base_local)
            }
            // Directory against nothing: only a file turning into a directory matters
            (SideState::Directory, _) if base_local.is_some() => {
                Verdict::Conflict(ConflictKind::Structural)
            }
            (_, SideState::Directory) if base_remote.is_some() => {
                Verdict::Conflict(ConflictKind::Structural)
            }
            _ => Verdict::NoOp,
        };
    }

    let local_hash = local.hash();
    let remote_hash = remote.hash();

    // Rule 2: converged
    if local_hash == remote_hash {
        let already_recorded = match record {
            Some(r) => r.is_converged() && r.last_synced_hash == local_hash,
            None => local_hash.is_none(),
        };
        return if already_recorded {
            Verdict::NoOp
        } else {
            Verdict::Converged { hash: local_hash }
        };
    }

    let local_changed = local_hash != base_local;
    let remote_changed = remote_hash != base_remote;

    match (local_changed, remote_changed) {
        // Rule 3: agreed to disagree
        (false, false) => Verdict::NoOp,
        // Rule 4: clean
        (true, false) => clean(Side::Local, local_hash, base_local),
        (false, true) => clean(Side::Remote, remote_hash, base_remote),
        // Rule 5: both moved
        (true, true) => Verdict::Conflict(match (local, remote) {
            (SideState::Absent, _) => ConflictKind::LocalDeleteRemoteModify,
            (_, SideState::Absent) => ConflictKind::RemoteDeleteLocalModify,
            _ => ConflictKind::ConcurrentModify,
        }),
    }
}

/// Directory on one side, file on the other. A skipped conflict leaves a
/// diverged record with no baseline for the directory side; while the file
/// side stays put that is agreed, not new.
fn shape_conflict(
    record: Option<&SyncStateRecord>,
    dir_baseline: Option<ContentHash>,
    file_unchanged: bool,
) -> Verdict {
    let skipped = record.is_some_and(|r| !r.is_converged());
    if skipped && dir_baseline.is_none() && file_unchanged {
        Verdict::NoOp
    } else {
        Verdict::Conflict(ConflictKind::Structural)
    }
}

/// Returns true if a change event carries nothing new for its side.
///
/// Used when enqueueing: a hash equal to the side's baseline is an echo of
/// our own write, a deletion of a key the side never had is noise, and a
/// directory appearing where no document ever lived is not a document.
pub fn is_unchanged(record: Option<&SyncStateRecord>, item: &SyncItem) -> bool {
    let baseline = record.and_then(|r| r.baseline(item.side));

    if item.shape == ItemShape::Directory {
        return record.map_or(true, |r| r.local_hash.is_none() && r.remote_hash.is_none());
    }

    match (item.is_deletion(), item.content_hash) {
        (true, _) => baseline.is_none(),
        (false, Some(hash)) => baseline == Some(hash),
        (false, None) => false,
    }
}

fn clean(from: Side, current: Option<ContentHash>, baseline: Option<ContentHash>) -> Verdict {
    let change = match (current, baseline) {
        (None, _) => ChangeKind::Deleted,
        (Some(_), None) => ChangeKind::Created,
        (Some(_), Some(_)) => ChangeKind::Modified,
    };

    Verdict::Clean {
        from,
        change,
        hash: current,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SyncKey;

    fn h(s: &str) -> ContentHash {
        ContentHash::of(s.as_bytes())
    }

    fn record(local: Option<ContentHash>, remote: Option<ContentHash>) -> SyncStateRecord {
        let key = SyncKey::new("k.md").unwrap();
        if local == remote {
            SyncStateRecord::converged(key, local, Side::Local, ChangeKind::Modified)
        } else {
            SyncStateRecord::diverged(key, local, remote, Side::Local, ChangeKind::Modified)
        }
    }

    fn swap(verdict: Verdict) -> Verdict {
        match verdict {
            Verdict::Clean { from, change, hash } => Verdict::Clean {
                from: from.other(),
                change,
                hash,
            },
            Verdict::Conflict(ConflictKind::LocalDeleteRemoteModify) => {
                Verdict::Conflict(ConflictKind::RemoteDeleteLocalModify)
            }
            Verdict::Conflict(ConflictKind::RemoteDeleteLocalModify) => {
                Verdict::Conflict(ConflictKind::LocalDeleteRemoteModify)
            }
            other => other,
        }
    }

    #[test]
    fn test_new_local_file_is_clean_create() {
        let verdict = classify(None, SideState::File(h("H1")), SideState::Absent);
        assert_eq!(
            verdict,
            Verdict::Clean {
                from: Side::Local,
                change: ChangeKind::Created,
                hash: Some(h("H1")),
            }
        );
    }

    #[test]
    fn test_concurrent_modify() {
        let rec = record(Some(h("H1")), Some(h("H1")));
        let verdict = classify(Some(&rec), SideState::File(h("H2")), SideState::File(h("H3")));
        assert_eq!(verdict, Verdict::Conflict(ConflictKind::ConcurrentModify));
    }

    #[test]
    fn test_remote_delete_local_modify() {
        let rec = record(Some(h("H1")), Some(h("H1")));
        let verdict = classify(Some(&rec), SideState::File(h("H2")), SideState::Absent);
        assert_eq!(verdict, Verdict::Conflict(ConflictKind::RemoteDeleteLocalModify));
    }

    #[test]
    fn test_independent_creates_with_different_content() {
        let verdict = classify(None, SideState::File(h("A")), SideState::File(h("B")));
        assert_eq!(verdict, Verdict::Conflict(ConflictKind::ConcurrentModify));
    }

    #[test]
    fn test_clean_delete_propagates() {
        let rec = record(Some(h("H1")), Some(h("H1")));
        let verdict = classify(Some(&rec), SideState::File(h("H1")), SideState::Absent);
        assert_eq!(
            verdict,
            Verdict::Clean {
                from: Side::Remote,
                change: ChangeKind::Deleted,
                hash: None,
            }
        );
    }

    #[test]
    fn test_converged_without_record() {
        let verdict = classify(None, SideState::File(h("H1")), SideState::File(h("H1")));
        assert_eq!(verdict, Verdict::Converged { hash: Some(h("H1")) });
    }

    #[test]
    fn test_synced_key_is_noop() {
        let rec = record(Some(h("H1")), Some(h("H1")));
        let verdict = classify(Some(&rec), SideState::File(h("H1")), SideState::File(h("H1")));
        assert_eq!(verdict, Verdict::NoOp);
    }

    #[test]
    fn test_skipped_divergence_stays_quiet() {
        let rec = record(Some(h("L")), Some(h("R")));
        let verdict = classify(Some(&rec), SideState::File(h("L")), SideState::File(h("R")));
        assert_eq!(verdict, Verdict::NoOp);

        // A later edit on one side is a clean change again
        let verdict = classify(Some(&rec), SideState::File(h("L2")), SideState::File(h("R")));
        assert!(matches!(verdict, Verdict::Clean { from: Side::Local, .. }));
    }

    #[test]
    fn test_structural_triggers() {
        let rec = record(Some(h("H1")), Some(h("H1")));

        assert_eq!(
            classify(None, SideState::Directory, SideState::File(h("H1"))),
            Verdict::Conflict(ConflictKind::Structural)
        );
        assert_eq!(
            classify(Some(&rec), SideState::Directory, SideState::Absent),
            Verdict::Conflict(ConflictKind::Structural)
        );
        assert_eq!(
            classify(None, SideState::Directory, SideState::Absent),
            Verdict::NoOp
        );
        assert_eq!(
            classify(Some(&rec), SideState::Directory, SideState::Directory),
            Verdict::NoOp
        );
    }

    #[test]
    fn test_skipped_structural_conflict_stays_quiet() {
        let rec = record(None, Some(h("H1")));
        assert_eq!(
            classify(Some(&rec), SideState::Directory, SideState::File(h("H1"))),
            Verdict::NoOp
        );
        assert_eq!(
            classify(Some(&rec), SideState::Directory, SideState::File(h("H2"))),
            Verdict::Conflict(ConflictKind::Structural)
        );
    }

    #[test]
    fn test_is_unchanged_filters_echoes() {
        let key = SyncKey::new("k.md").unwrap();
        let rec = record(Some(h("H1")), Some(h("H1")));

        let echo = SyncItem::new(key.clone(), Side::Remote, ChangeKind::Modified, Some(h("H1")));
        assert!(is_unchanged(Some(&rec), &echo));

        let edit = SyncItem::new(key.clone(), Side::Local, ChangeKind::Modified, Some(h("H2")));
        assert!(!is_unchanged(Some(&rec), &edit));

        let unknown_delete = SyncItem::deleted(key.clone(), Side::Local);
        assert!(is_unchanged(None, &unknown_delete));
        assert!(!is_unchanged(Some(&rec), &unknown_delete));

        let dir = SyncItem::new(key, Side::Local, ChangeKind::Modified, None)
            .with_shape(ItemShape::Directory);
        assert!(is_unchanged(None, &dir));
        assert!(!is_unchanged(Some(&rec), &dir));
    }

    /// Every combination of baseline and side state, classified twice and
    /// with the sides swapped.
    #[test]
    fn test_classification_table_is_deterministic_and_symmetric() {
        let hashes = [None, Some(h("H1")), Some(h("H2"))];
        let states = [
            SideState::Absent,
            SideState::File(h("H1")),
            SideState::File(h("H2")),
            SideState::File(h("H3")),
            SideState::Directory,
        ];

        let mut records: Vec<Option<SyncStateRecord>> = vec![None];
        for l in hashes {
            for r in hashes {
                records.push(Some(record(l, r)));
            }
        }

        for rec in &records {
            let mirrored = rec
                .as_ref()
                .map(|r| record(r.remote_hash, r.local_hash));

            for local in states {
                for remote in states {
                    let first = classify(rec.as_ref(), local, remote);
                    let second = classify(rec.as_ref(), local, remote);
                    assert_eq!(first, second, "non-deterministic for {local:?}/{remote:?}");

                    let swapped = classify(mirrored.as_ref(), remote, local);
                    assert_eq!(
                        swap(first),
                        swapped,
                        "asymmetric for {local:?}/{remote:?} with {rec:?}"
                    );

                    // A conflict always involves a change the other side did not see
                    if let Verdict::Conflict(kind) = first {
                        if kind != ConflictKind::Structural {
                            assert_ne!(local.hash(), remote.hash());
                        }
                    }
                }
            }
        }
    }
}
