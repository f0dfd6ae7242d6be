//! # Conflict Resolver
//!
//! Applies the resolution policy and carries out a winning side's content.
//!
//! ```text
//!   Conflict ──► policy.decide ──┬── Auto { winner } ──► apply(winner)
//!                                └── Manual          ──► manual queue
//!
//!   apply(winner):
//!     1. backup_on_resolve: back up every side holding a file
//!                           (reason ConflictResolution)
//!     2. transfer winner → loser (the loser gets a routine backup
//!                           if step 1 was skipped)
//! ```
//!
//! A winner holding a directory or nothing makes the loser's document go away.

use tracing::{debug, info};

use crate::error::SyncResult;
use crate::transfer::{Observation, Transfer};
use wikisync_core::{
    BackupReason, Conflict, ContentHash, Decision, ResolutionPolicy, Side, SyncKey,
};

/// Decides and applies conflict resolutions.
#[derive(Clone)]
pub struct Resolver {
    policy: ResolutionPolicy,
    backup_on_resolve: bool,
    transfer: Transfer,
}

impl Resolver {
    pub fn new(policy: ResolutionPolicy, backup_on_resolve: bool, transfer: Transfer) -> Self {
        Resolver {
            policy,
            backup_on_resolve,
            transfer,
        }
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    pub fn decide(&self, conflict: &Conflict) -> Decision {
        let decision = self.policy.decide(conflict);
        debug!(key = %conflict.key, kind = %conflict.kind, ?decision, "Conflict decided");
        decision
    }

    /// Makes `winner`'s content the content of both sides.
    ///
    /// Returns the hash both sides now hold (`None` when the key is gone).
    pub async fn apply(
        &self,
        key: &SyncKey,
        winner: Side,
        winning: &Observation,
        losing: &Observation,
    ) -> SyncResult<Option<ContentHash>> {
        if winning.state == losing.state {
            return Ok(winning.state.hash());
        }

        if self.backup_on_resolve {
            for (side, observed) in [(winner, winning), (winner.other(), losing)] {
                if observed.is_file() {
                    self.transfer
                        .backups()
                        .backup(key, side, BackupReason::ConflictResolution)
                        .await?;
                }
            }
        }

        let hash = self
            .transfer
            .apply(
                key,
                winner.other(),
                winning.content.as_deref(),
                losing.state,
                self.backup_on_resolve,
            )
            .await?;

        info!(key = %key, %winner, "Conflict resolution applied");
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupManager;
    use crate::config::LocalSettings;
    use crate::local::{LocalFs, LocalTree, PathFilter};
    use crate::remote::MemoryRemote;
    use std::sync::Arc;
    use wikisync_core::ConflictKind;
    use wikisync_db::BackupStore;

    async fn setup(
        dir: &std::path::Path,
        backup_on_resolve: bool,
    ) -> (Resolver, LocalTree, MemoryRemote, BackupStore) {
        std::fs::create_dir_all(dir.join("docs")).unwrap();
        let local = LocalTree::new(
            dir.join("docs"),
            PathFilter::from_settings(&LocalSettings::default()),
        );
        let remote = MemoryRemote::new();
        let store = BackupStore::in_memory(dir.join("backups")).await.unwrap();
        let backups = BackupManager::new(
            Arc::new(store.clone()),
            Arc::new(local.clone()),
            Arc::new(remote.clone()),
            chrono::Duration::days(30),
        );
        let transfer = Transfer::new(Arc::new(local.clone()), Arc::new(remote.clone()), backups);
        let resolver = Resolver::new(ResolutionPolicy::default(), backup_on_resolve, transfer);
        (resolver, local, remote, store)
    }

    #[tokio::test]
    async fn test_apply_backs_up_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, local, remote, store) = setup(dir.path(), true).await;
        let k = SyncKey::new("a.md").unwrap();
        local.write(&k, b"L").await.unwrap();
        remote.put(&k, "R").await;

        let transfer = &resolver.transfer;
        let winning = transfer.observe(&k, Side::Remote).await.unwrap();
        let losing = transfer.observe(&k, Side::Local).await.unwrap();

        let hash = resolver.apply(&k, Side::Remote, &winning, &losing).await.unwrap();
        assert_eq!(hash, Some(ContentHash::of(b"R")));
        assert_eq!(local.read(&k).await.unwrap().unwrap(), b"R");

        let backups = store.list(&k).await.unwrap();
        assert_eq!(backups.len(), 2);
        assert!(backups.iter().all(|b| b.reason == BackupReason::ConflictResolution));
    }

    #[tokio::test]
    async fn test_loser_still_backed_up_without_resolution_backups() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, local, remote, store) = setup(dir.path(), false).await;
        let k = SyncKey::new("a.md").unwrap();
        local.write(&k, b"L").await.unwrap();
        remote.put(&k, "R").await;

        let winning = resolver.transfer.observe(&k, Side::Local).await.unwrap();
        let losing = resolver.transfer.observe(&k, Side::Remote).await.unwrap();
        resolver.apply(&k, Side::Local, &winning, &losing).await.unwrap();

        let backups = store.list(&k).await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].side, Side::Remote);
        assert_eq!(backups[0].reason, BackupReason::RoutineSync);
        assert_eq!(remote.content(&k).await.unwrap(), b"L");
    }

    #[tokio::test]
    async fn test_structural_is_never_automatic() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, ..) = setup(dir.path(), true).await;
        let conflict = Conflict::new(
            SyncKey::new("a.md").unwrap(),
            ConflictKind::Structural,
            None,
            None,
        );
        assert_eq!(resolver.decide(&conflict), Decision::Manual);
    }
}
