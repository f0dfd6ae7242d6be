//! # Sync Worker
//!
//! Processes one [`WorkUnit`]: observes both sides, classifies, then
//! transfers, records or escalates.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WorkUnit { key, local?, remote? }                                      │
//! │      │                                                                  │
//! │      ├── forced side? ──► Resolver::apply(winner) ──────► Synced       │
//! │      │                                                                  │
//! │      └── observe local + remote                                        │
//! │            └── classify(record, local, remote)                         │
//! │                  ├── NoOp       ─────────────────────────► Unchanged   │
//! │                  ├── Converged  ─────────────────────────► Converged   │
//! │                  ├── Clean      ──► Transfer::apply ─────► Synced      │
//! │                  └── Conflict   ──► policy                             │
//! │                                      ├── Auto   ──► apply ► AutoResolved│
//! │                                      └── Manual ─────────► Manual      │
//! │                                                                         │
//! │  Any error ─────────────────────────────────────────────► Failed      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The worker never touches engine state. It returns a [`UnitReport`] and the
//! orchestrator applies it between batches.

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::queue::WorkUnit;
use crate::resolver::Resolver;
use crate::transfer::{Observation, Transfer};
use wikisync_core::{
    classify, ChangeKind, Conflict, ContentHash, Decision, ItemShape, Side, SideState, SyncItem,
    SyncKey, SyncStateRecord, Verdict,
};

/// What happened to one unit.
#[derive(Debug)]
pub enum UnitOutcome {
    /// Content (or a deletion) was copied to the other side.
    Synced {
        record: SyncStateRecord,
        from: Side,
        change: ChangeKind,
    },
    /// Both sides already agreed; only the record changes.
    Converged { record: SyncStateRecord },
    /// Nothing to do.
    Unchanged,
    /// A conflict the policy resolved on its own.
    AutoResolved {
        conflict: Conflict,
        winner: Side,
        record: SyncStateRecord,
    },
    /// A conflict that waits for an operator.
    Manual { conflict: Conflict },
    Failed { error: SyncError },
}

/// A processed unit and its outcome.
#[derive(Debug)]
pub struct UnitReport {
    pub unit: WorkUnit,
    pub outcome: UnitOutcome,
}

/// Runs work units against both sides.
#[derive(Clone)]
pub struct SyncWorker {
    transfer: Transfer,
    resolver: Resolver,
}

impl SyncWorker {
    pub fn new(transfer: Transfer, resolver: Resolver) -> Self {
        SyncWorker { transfer, resolver }
    }

    /// Processes a unit given the key's current state record.
    pub async fn process(&self, unit: WorkUnit, record: Option<SyncStateRecord>) -> UnitReport {
        let outcome = match self.run(&unit, record.as_ref()).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(?error, key = %unit.key, "Sync unit failed");
                UnitOutcome::Failed { error }
            }
        };
        UnitReport { unit, outcome }
    }

    async fn run(
        &self,
        unit: &WorkUnit,
        record: Option<&SyncStateRecord>,
    ) -> SyncResult<UnitOutcome> {
        let key = &unit.key;
        let local = self.transfer.observe(key, Side::Local).await?;
        let remote = self.transfer.observe(key, Side::Remote).await?;

        if let Some(winner) = unit.forced_side() {
            return self.force(key, winner, &local, &remote).await;
        }

        let verdict = classify(record, local.state, remote.state);
        debug!(key = %key, ?verdict, "Unit classified");

        match verdict {
            Verdict::NoOp => Ok(UnitOutcome::Unchanged),

            Verdict::Converged { hash } => {
                let side = origin(unit);
                let change = change_for(hash, record);
                Ok(UnitOutcome::Converged {
                    record: SyncStateRecord::converged(key.clone(), hash, side, change),
                })
            }

            Verdict::Clean { from, change, .. } => {
                let (source, target) = pick(from, &local, &remote);
                let written = self
                    .transfer
                    .apply(key, from.other(), source.content.as_deref(), target.state, false)
                    .await?;
                Ok(UnitOutcome::Synced {
                    record: SyncStateRecord::converged(key.clone(), written, from, change),
                    from,
                    change,
                })
            }

            Verdict::Conflict(kind) => {
                let conflict = Conflict::new(
                    key.clone(),
                    kind,
                    conflict_item(unit, Side::Local, &local, record),
                    conflict_item(unit, Side::Remote, &remote, record),
                );

                match self.resolver.decide(&conflict) {
                    Decision::Manual => Ok(UnitOutcome::Manual { conflict }),
                    Decision::Auto { winner } => {
                        let (winning, losing) = pick(winner, &local, &remote);
                        let hash = self.resolver.apply(key, winner, winning, losing).await?;
                        let change = change_for(hash, record);
                        Ok(UnitOutcome::AutoResolved {
                            record: SyncStateRecord::converged(key.clone(), hash, winner, change),
                            conflict,
                            winner,
                        })
                    }
                }
            }
        }
    }

    /// Applies a manual USE_LOCAL / USE_REMOTE without classification.
    async fn force(
        &self,
        key: &SyncKey,
        winner: Side,
        local: &Observation,
        remote: &Observation,
    ) -> SyncResult<UnitOutcome> {
        let (winning, losing) = pick(winner, local, remote);
        let hash = self.resolver.apply(key, winner, winning, losing).await?;

        let change = match (hash, losing.state) {
            (None, _) => ChangeKind::Deleted,
            (Some(_), SideState::File(_)) => ChangeKind::Modified,
            (Some(_), _) => ChangeKind::Created,
        };
        Ok(UnitOutcome::Synced {
            record: SyncStateRecord::converged(key.clone(), hash, winner, change),
            from: winner,
            change,
        })
    }
}

/// `(side, other side)` observations.
fn pick<'a>(
    side: Side,
    local: &'a Observation,
    remote: &'a Observation,
) -> (&'a Observation, &'a Observation) {
    match side {
        Side::Local => (local, remote),
        Side::Remote => (remote, local),
    }
}

/// The side whose event put the unit in the queue.
fn origin(unit: &WorkUnit) -> Side {
    if unit.local.is_some() {
        Side::Local
    } else {
        Side::Remote
    }
}

fn change_for(hash: Option<ContentHash>, record: Option<&SyncStateRecord>) -> ChangeKind {
    match (hash, record.and_then(|r| r.last_synced_hash)) {
        (None, _) => ChangeKind::Deleted,
        (Some(_), None) => ChangeKind::Created,
        (Some(_), Some(_)) => ChangeKind::Modified,
    }
}

/// The conflict item for one side; `None` when the side holds nothing.
///
/// The observation time is the queued event's when the side reported one,
/// otherwise the side's own modification time.
fn conflict_item(
    unit: &WorkUnit,
    side: Side,
    observed: &Observation,
    record: Option<&SyncStateRecord>,
) -> Option<SyncItem> {
    let queued = unit.entry(side).map(|e| &e.item);
    let (shape, hash) = match observed.state {
        SideState::Absent => return None,
        SideState::Directory => (ItemShape::Directory, None),
        SideState::File(hash) => (ItemShape::File, Some(hash)),
    };

    let change = match queued {
        Some(item) if !item.is_deletion() => item.change_kind,
        _ if record.and_then(|r| r.baseline(side)).is_none() => ChangeKind::Created,
        _ => ChangeKind::Modified,
    };
    let at = queued
        .map(|item| item.observed_at)
        .or(observed.modified)
        .unwrap_or_else(Utc::now);

    Some(
        SyncItem::new(unit.key.clone(), side, change, hash)
            .with_shape(shape)
            .observed_at(at),
    )
}
