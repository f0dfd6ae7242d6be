//! # State Snapshot
//!
//! The durable view of what was last synchronized. Serialized as one JSON
//! document by the engine's state file adapter.
//!
//! ```text
//! StateSnapshot
//! ├── version          format version, bumped on incompatible changes
//! ├── records          key → SyncStateRecord (sorted for stable diffs)
//! ├── conflicts        manual conflict queue, oldest first
//! ├── remote_cursor    newest remote modification seen by the poller
//! └── last_sync_at     completion time of the last batch
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::key::SyncKey;
use crate::types::{Conflict, Side, SyncItem, SyncStateRecord};

/// Current snapshot format version.
pub const STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    STATE_VERSION
}

/// Result of [`StateSnapshot::queue_conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queued {
    /// The key was not queued before.
    New(Uuid),
    /// The key was queued, but its kind or either side's content moved on.
    Changed(Uuid),
    /// The key was queued exactly as observed now.
    Unchanged(Uuid),
}

impl Queued {
    pub fn id(self) -> Uuid {
        match self {
            Queued::New(id) | Queued::Changed(id) | Queued::Unchanged(id) => id,
        }
    }

    /// True when an operator has something new to look at.
    pub fn is_news(self) -> bool {
        !matches!(self, Queued::Unchanged(_))
    }
}

fn same_content(a: &Option<SyncItem>, b: &Option<SyncItem>) -> bool {
    let fingerprint = |item: &Option<SyncItem>| item.as_ref().map(|i| (i.shape, i.content_hash));
    fingerprint(a) == fingerprint(b)
}

/// Everything the engine persists between batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub records: BTreeMap<SyncKey, SyncStateRecord>,

    #[serde(default)]
    pub conflicts: Vec<Conflict>,

    #[serde(default)]
    pub remote_cursor: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        StateSnapshot {
            version: STATE_VERSION,
            records: BTreeMap::new(),
            conflicts: Vec::new(),
            remote_cursor: None,
            last_sync_at: None,
        }
    }
}

impl StateSnapshot {
    pub fn record(&self, key: &SyncKey) -> Option<&SyncStateRecord> {
        self.records.get(key)
    }

    /// Inserts or replaces the record for its key.
    pub fn upsert(&mut self, record: SyncStateRecord) {
        self.records.insert(record.key.clone(), record);
    }

    /// Keys that currently exist on `side` according to the baselines.
    pub fn known_keys(&self, side: Side) -> impl Iterator<Item = &SyncKey> {
        self.records
            .values()
            .filter(move |r| r.baseline(side).is_some())
            .map(|r| &r.key)
    }

    /// Adds a conflict to the manual queue.
    ///
    /// A key is queued at most once. Re-detecting a queued key updates the
    /// entry in place and keeps its id; the result says whether anything an
    /// operator would see has changed.
    pub fn queue_conflict(&mut self, conflict: Conflict) -> Queued {
        match self.conflicts.iter_mut().find(|c| c.key == conflict.key) {
            Some(existing) => {
                let same = existing.kind == conflict.kind
                    && same_content(&existing.local_item, &conflict.local_item)
                    && same_content(&existing.remote_item, &conflict.remote_item);
                if same {
                    return Queued::Unchanged(existing.id);
                }
                existing.kind = conflict.kind;
                existing.local_item = conflict.local_item;
                existing.remote_item = conflict.remote_item;
                existing.detected_at = conflict.detected_at;
                Queued::Changed(existing.id)
            }
            None => {
                let id = conflict.id;
                self.conflicts.push(conflict);
                Queued::New(id)
            }
        }
    }

    pub fn conflict(&self, id: Uuid) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.id == id)
    }

    /// Removes a conflict from the manual queue.
    pub fn take_conflict(&mut self, id: Uuid) -> Option<Conflict> {
        let index = self.conflicts.iter().position(|c| c.id == id)?;
        Some(self.conflicts.remove(index))
    }

    /// Drops any queued conflict for a key (after the key converged).
    pub fn clear_conflicts_for(&mut self, key: &SyncKey) -> usize {
        let before = self.conflicts.len();
        self.conflicts.retain(|c| &c.key != key);
        before - self.conflicts.len()
    }

    /// Drops tombstones last synced before `cutoff`.
    ///
    /// Keys with a queued conflict, or for which `busy` returns true, are
    /// kept. A missing record and a tombstone classify the same way, so
    /// pruning never changes what the next sync does. Returns the number of
    /// records removed.
    pub fn prune_tombstones(
        &mut self,
        cutoff: DateTime<Utc>,
        busy: impl Fn(&SyncKey) -> bool,
    ) -> usize {
        let conflicts = &self.conflicts;
        let before = self.records.len();
        self.records.retain(|key, record| {
            !record.is_tombstone()
                || record.last_synced_at >= cutoff
                || busy(key)
                || conflicts.iter().any(|c| &c.key == key)
        });
        before - self.records.len()
    }

    /// Advances the remote cursor; never moves it backwards.
    pub fn advance_cursor(&mut self, cursor: DateTime<Utc>) {
        if self.remote_cursor.map_or(true, |current| cursor > current) {
            self.remote_cursor = Some(cursor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::ContentHash;
    use crate::types::{ChangeKind, ConflictKind};
    use chrono::Duration;

    fn key(s: &str) -> SyncKey {
        SyncKey::new(s).unwrap()
    }

    fn local(k: &str, content: &[u8]) -> Option<SyncItem> {
        Some(SyncItem::new(key(k), Side::Local, ChangeKind::Modified, Some(ContentHash::of(content))))
    }

    #[test]
    fn test_requeued_conflict_keeps_id() {
        let mut state = StateSnapshot::default();
        let first = Conflict::new(key("a.md"), ConflictKind::ConcurrentModify, None, None);
        let queued = state.queue_conflict(first);
        assert!(matches!(queued, Queued::New(_)));
        let id = queued.id();

        let again = Conflict::new(key("a.md"), ConflictKind::RemoteDeleteLocalModify, None, None);
        assert_eq!(state.queue_conflict(again), Queued::Changed(id));
        assert_eq!(state.conflicts.len(), 1);
        assert_eq!(state.conflicts[0].kind, ConflictKind::RemoteDeleteLocalModify);

        assert!(state.take_conflict(id).is_some());
        assert!(state.conflicts.is_empty());
    }

    #[test]
    fn test_redetected_conflict_is_not_news() {
        let mut state = StateSnapshot::default();
        let kind = ConflictKind::RemoteDeleteLocalModify;
        let id = state
            .queue_conflict(Conflict::new(key("a.md"), kind, local("a.md", b"H2"), None))
            .id();
        let detected_at = state.conflicts[0].detected_at;

        // Same content observed again later, with a different change kind
        let mut item = local("a.md", b"H2");
        if let Some(item) = item.as_mut() {
            item.change_kind = ChangeKind::Created;
        }
        let queued = state.queue_conflict(Conflict::new(key("a.md"), kind, item, None));
        assert_eq!(queued, Queued::Unchanged(id));
        assert!(!queued.is_news());
        assert_eq!(state.conflicts[0].detected_at, detected_at);

        // New local content is news again
        let queued = state.queue_conflict(Conflict::new(key("a.md"), kind, local("a.md", b"H3"), None));
        assert_eq!(queued, Queued::Changed(id));
        assert_eq!(state.conflicts[0].hash(Side::Local), Some(ContentHash::of(b"H3")));
    }

    #[test]
    fn test_prune_tombstones() {
        let mut state = StateSnapshot::default();
        let h = ContentHash::of(b"x");
        state.upsert(SyncStateRecord::converged(key("live.md"), Some(h), Side::Local, ChangeKind::Created));
        for k in ["old.md", "busy.md", "held.md"] {
            state.upsert(SyncStateRecord::converged(key(k), None, Side::Remote, ChangeKind::Deleted));
        }
        state.queue_conflict(Conflict::new(key("held.md"), ConflictKind::Structural, None, None));
        let cutoff = Utc::now() + Duration::seconds(1);

        let pruned = state.prune_tombstones(cutoff, |k| k.as_str() == "busy.md");
        assert_eq!(pruned, 1);
        assert!(state.record(&key("old.md")).is_none());
        assert!(state.record(&key("busy.md")).is_some());
        assert!(state.record(&key("held.md")).is_some());
        assert!(state.record(&key("live.md")).is_some());

        // Recent tombstones stay
        assert_eq!(state.prune_tombstones(Utc::now() - Duration::days(1), |_| false), 0);
    }

    #[test]
    fn test_cursor_never_moves_back() {
        let mut state = StateSnapshot::default();
        let now = Utc::now();
        state.advance_cursor(now);
        state.advance_cursor(now - Duration::minutes(1));
        assert_eq!(state.remote_cursor, Some(now));
    }

    #[test]
    fn test_known_keys_skip_tombstones() {
        let mut state = StateSnapshot::default();
        let h = ContentHash::of(b"x");
        state.upsert(SyncStateRecord::converged(key("live.md"), Some(h), Side::Local, ChangeKind::Created));
        state.upsert(SyncStateRecord::converged(key("gone.md"), None, Side::Local, ChangeKind::Deleted));

        let remote: Vec<_> = state.known_keys(Side::Remote).cloned().collect();
        assert_eq!(remote, vec![key("live.md")]);
    }

    #[test]
    fn test_json_round_trip() {
        let mut state = StateSnapshot::default();
        state.upsert(SyncStateRecord::converged(
            key("notes/a.md"),
            Some(ContentHash::of(b"H1")),
            Side::Local,
            ChangeKind::Created,
        ));
        let json = serde_json::to_string_pretty(&state).unwrap();
        let parsed: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
