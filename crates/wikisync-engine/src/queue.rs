//! # Sync Queue
//!
//! FIFO of pending changes with at most one entry per `(side, key)`.
//!
//! ```text
//!  push(local a.md H2) ──► [ (L,a.md) (R,b.md) (L,c.md) ]
//!  push(local a.md H3) ──► merged in place, position kept
//!
//!  take_batch(2)       ──► units: { a.md: L }, { b.md: R }
//!                          plus the partner of each key, even past the
//!                          batch limit, so a key is never split across
//!                          two batches
//! ```

use std::collections::{HashMap, VecDeque};

use wikisync_core::{ItemStatus, Side, SyncItem, SyncKey};

/// A queued change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub item: SyncItem,
    /// Set by a manual resolution: this side wins without detection.
    pub forced: bool,
}

impl QueueEntry {
    pub fn observed(item: SyncItem) -> Self {
        QueueEntry {
            item,
            forced: false,
        }
    }

    pub fn forced(item: SyncItem) -> Self {
        QueueEntry { item, forced: true }
    }
}

/// Everything queued for one key, processed as a single unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub key: SyncKey,
    pub local: Option<QueueEntry>,
    pub remote: Option<QueueEntry>,
}

impl WorkUnit {
    fn new(key: SyncKey) -> Self {
        WorkUnit {
            key,
            local: None,
            remote: None,
        }
    }

    pub fn entry(&self, side: Side) -> Option<&QueueEntry> {
        match side {
            Side::Local => self.local.as_ref(),
            Side::Remote => self.remote.as_ref(),
        }
    }

    fn slot(&mut self, side: Side) -> &mut Option<QueueEntry> {
        match side {
            Side::Local => &mut self.local,
            Side::Remote => &mut self.remote,
        }
    }

    /// The side a manual resolution forced, if any. Local wins if both are.
    pub fn forced_side(&self) -> Option<Side> {
        [Side::Local, Side::Remote]
            .into_iter()
            .find(|side| self.entry(*side).is_some_and(|e| e.forced))
    }

    /// Consumes the unit, yielding its entries with a final status.
    pub fn into_entries(self, status: ItemStatus) -> Vec<QueueEntry> {
        [self.local, self.remote]
            .into_iter()
            .flatten()
            .map(|mut e| {
                e.item.status = status;
                e
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        usize::from(self.local.is_some()) + usize::from(self.remote.is_some())
    }
}

/// Pending changes, oldest first.
#[derive(Debug, Default)]
pub struct SyncQueue {
    order: VecDeque<(Side, SyncKey)>,
    entries: HashMap<(Side, SyncKey), QueueEntry>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a change, merging with a queued change for the same side and key.
    ///
    /// Returns true if a new entry was added.
    pub fn push(&mut self, entry: QueueEntry) -> bool {
        let slot = (entry.item.side, entry.item.key.clone());

        if let Some(existing) = self.entries.get_mut(&slot) {
            existing.item.merge(entry.item);
            existing.forced |= entry.forced;
            return false;
        }

        self.order.push_back(slot.clone());
        self.entries.insert(slot, entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, side: Side, key: &SyncKey) -> bool {
        self.entries.contains_key(&(side, key.clone()))
    }

    /// Removes up to `max` entries (plus partners) grouped into units,
    /// marked in flight.
    pub fn take_batch(&mut self, max: usize) -> Vec<WorkUnit> {
        let mut units: Vec<WorkUnit> = Vec::new();
        let mut index: HashMap<SyncKey, usize> = HashMap::new();
        let mut taken = 0;

        while taken < max {
            let Some((side, key)) = self.order.pop_front() else {
                break;
            };
            // Slot already taken as a partner
            let Some(entry) = self.entries.remove(&(side, key.clone())) else {
                continue;
            };
            taken += 1;

            let position = *index.entry(key.clone()).or_insert_with(|| {
                units.push(WorkUnit::new(key.clone()));
                units.len() - 1
            });
            let unit = &mut units[position];
            *unit.slot(side) = Some(in_flight(entry));

            let partner = side.other();
            if unit.entry(partner).is_none() {
                if let Some(entry) = self.entries.remove(&(partner, key)) {
                    taken += 1;
                    *unit.slot(partner) = Some(in_flight(entry));
                }
            }
        }

        units
    }
}

fn in_flight(mut entry: QueueEntry) -> QueueEntry {
    entry.item.status = ItemStatus::InFlight;
    entry
}
