//! # Resolution Policy
//!
//! Decides whether a conflict kind is resolved automatically and, if so,
//! which side wins.
//!
//! ```text
//!   ConflictKind ──► STRUCTURAL?            ──► Manual (always)
//!                ──► in auto_resolve_kinds   ──► Auto(most recent wins)
//!                ──► otherwise               ──► Manual
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{Conflict, ConflictKind, Side};

/// What to do with a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Apply immediately, `winner` overwrites the other side.
    Auto { winner: Side },
    /// Park in the manual queue until an operator resolves it.
    Manual,
}

/// Which conflict kinds are auto-resolved and which wait for an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPolicy {
    /// Kinds resolved with the most-recent-wins strategy.
    #[serde(default = "default_auto_kinds")]
    pub auto_resolve_kinds: BTreeSet<ConflictKind>,

    /// Kinds that always require an operator decision.
    #[serde(default = "default_manual_kinds")]
    pub manual_resolve_kinds: BTreeSet<ConflictKind>,
}

fn default_auto_kinds() -> BTreeSet<ConflictKind> {
    BTreeSet::from([ConflictKind::ConcurrentModify])
}

fn default_manual_kinds() -> BTreeSet<ConflictKind> {
    BTreeSet::from([
        ConflictKind::Structural,
        ConflictKind::LocalDeleteRemoteModify,
        ConflictKind::RemoteDeleteLocalModify,
    ])
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        ResolutionPolicy {
            auto_resolve_kinds: default_auto_kinds(),
            manual_resolve_kinds: default_manual_kinds(),
        }
    }
}

impl ResolutionPolicy {
    /// Returns true if conflicts of this kind are resolved without an operator.
    ///
    /// Manual listing wins over auto listing, and structural conflicts are
    /// never automatic.
    pub fn is_auto(&self, kind: ConflictKind) -> bool {
        kind != ConflictKind::Structural
            && self.auto_resolve_kinds.contains(&kind)
            && !self.manual_resolve_kinds.contains(&kind)
    }

    /// Decides how to handle a conflict.
    pub fn decide(&self, conflict: &Conflict) -> Decision {
        if !self.is_auto(conflict.kind) {
            return Decision::Manual;
        }

        let local_at = conflict.local_item.as_ref().map(|i| i.observed_at);
        let remote_at = conflict.remote_item.as_ref().map(|i| i.observed_at);

        Decision::Auto {
            winner: most_recent(local_at, remote_at),
        }
    }
}

/// Most-recently-observed side wins; ties go to local.
///
/// A side with no observation (it deleted the key) loses to a side that still
/// holds content, so automatic resolution never turns an edit into a delete.
pub fn most_recent(local: Option<DateTime<Utc>>, remote: Option<DateTime<Utc>>) -> Side {
    match (local, remote) {
        (Some(l), Some(r)) if r > l => Side::Remote,
        (None, Some(_)) => Side::Remote,
        _ => Side::Local,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::ContentHash;
    use crate::key::SyncKey;
    use crate::types::{ChangeKind, SyncItem};
    use chrono::Duration;

    fn item(side: Side, at: DateTime<Utc>) -> SyncItem {
        SyncItem::new(
            SyncKey::new("k.md").unwrap(),
            side,
            ChangeKind::Modified,
            Some(ContentHash::of(side.to_string().as_bytes())),
        )
        .observed_at(at)
    }

    #[test]
    fn test_default_policy() {
        let policy = ResolutionPolicy::default();
        assert!(policy.is_auto(ConflictKind::ConcurrentModify));
        assert!(!policy.is_auto(ConflictKind::Structural));
        assert!(!policy.is_auto(ConflictKind::LocalDeleteRemoteModify));
        assert!(!policy.is_auto(ConflictKind::RemoteDeleteLocalModify));
    }

    #[test]
    fn test_structural_forced_manual() {
        let policy = ResolutionPolicy {
            auto_resolve_kinds: ConflictKind::ALL.into_iter().collect(),
            manual_resolve_kinds: BTreeSet::new(),
        };
        assert!(!policy.is_auto(ConflictKind::Structural));
        assert!(policy.is_auto(ConflictKind::RemoteDeleteLocalModify));
    }

    #[test]
    fn test_unlisted_kind_is_manual() {
        let policy = ResolutionPolicy {
            auto_resolve_kinds: BTreeSet::new(),
            manual_resolve_kinds: BTreeSet::new(),
        };
        assert!(!policy.is_auto(ConflictKind::ConcurrentModify));
    }

    #[test]
    fn test_most_recent_wins() {
        let now = Utc::now();
        let earlier = now - Duration::seconds(5);
        let policy = ResolutionPolicy::default();

        let conflict = Conflict::new(
            SyncKey::new("k.md").unwrap(),
            ConflictKind::ConcurrentModify,
            Some(item(Side::Local, now)),
            Some(item(Side::Remote, earlier)),
        );
        assert_eq!(policy.decide(&conflict), Decision::Auto { winner: Side::Local });

        let conflict = Conflict::new(
            SyncKey::new("k.md").unwrap(),
            ConflictKind::ConcurrentModify,
            Some(item(Side::Local, earlier)),
            Some(item(Side::Remote, now)),
        );
        assert_eq!(policy.decide(&conflict), Decision::Auto { winner: Side::Remote });
    }

    #[test]
    fn test_tie_goes_to_local() {
        let now = Utc::now();
        assert_eq!(most_recent(Some(now), Some(now)), Side::Local);
    }

    #[test]
    fn test_deleting_side_loses() {
        let now = Utc::now();
        assert_eq!(most_recent(None, Some(now)), Side::Remote);
        assert_eq!(most_recent(Some(now), None), Side::Local);
    }
}
