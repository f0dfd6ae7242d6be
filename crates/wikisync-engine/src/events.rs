//! # Engine Events
//!
//! Everything the engine reports is an [`EngineEvent`] on a broadcast
//! channel. Subscribers (the CLI, tests, the notifier forwarder) each get
//! their own receiver; a slow subscriber lags, it never blocks the engine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use wikisync_core::{ChangeKind, ConflictKind, ContentHash, Resolution, Side, SyncKey};

/// Buffer of the event channel. Lagging receivers skip the oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something the engine did or noticed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Started,

    Stopped,

    /// Content was copied to the other side (or a deletion propagated).
    ItemSynced {
        key: SyncKey,
        from: Side,
        change: ChangeKind,
        hash: Option<ContentHash>,
        completed_at: DateTime<Utc>,
    },

    ConflictDetected {
        id: Uuid,
        key: SyncKey,
        kind: ConflictKind,
        automatic: bool,
    },

    ConflictResolved {
        id: Uuid,
        key: SyncKey,
        resolution: Resolution,
        automatic: bool,
    },

    /// A unit failed; it is retried on the next cycle.
    SyncFailed {
        key: Option<SyncKey>,
        message: String,
        retryable: bool,
    },

    PollFailed { message: String },

    /// The state file was unreadable and has been moved aside.
    StateLoadFailed {
        message: String,
        quarantined_to: Option<String>,
    },

    BatchCompleted {
        processed: usize,
        synced: usize,
        conflicts: usize,
        failed: usize,
    },

    BackupsSwept { deleted: usize, kept: usize },

    /// A backup was written back to the side it was taken from.
    BackupRestored { id: Uuid, key: SyncKey, side: Side },
}

impl EngineEvent {
    /// Stable dotted name, used as the notification type.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Started => "engine:started",
            EngineEvent::Stopped => "engine:stopped",
            EngineEvent::ItemSynced { .. } => "sync:item",
            EngineEvent::ConflictDetected { .. } => "conflict:detected",
            EngineEvent::ConflictResolved { .. } => "conflict:resolved",
            EngineEvent::SyncFailed { .. } => "sync:error",
            EngineEvent::PollFailed { .. } => "poll:failed",
            EngineEvent::StateLoadFailed { .. } => "state:load_failed",
            EngineEvent::BatchCompleted { .. } => "sync:batch",
            EngineEvent::BackupsSwept { .. } => "backup:swept",
            EngineEvent::BackupRestored { .. } => "backup:restored",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::ConflictDetected {
            id: Uuid::nil(),
            key: SyncKey::new("notes/a.md").unwrap(),
            kind: ConflictKind::ConcurrentModify,
            automatic: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conflict_detected");
        assert_eq!(json["key"], "notes/a.md");
        assert_eq!(json["kind"], "concurrent_modify");
        assert_eq!(event.name(), "conflict:detected");
    }
}
