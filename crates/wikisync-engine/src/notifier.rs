//! # Notifier
//!
//! Operator-facing notifications for conflicts and failures.
//!
//! ## Flow
//! ```text
//! ┌──────────────┐  broadcast   ┌────────────────┐   notify()   ┌──────────────┐
//! │  SyncEngine  │ ───────────► │   Forwarder    │ ───────────► │  Notifier    │
//! │  (events)    │              │  (spawned)     │              │  tracing /   │
//! └──────────────┘              └────────────────┘              │  webhook     │
//!                                                               └──────────────┘
//! ```
//!
//! Notification is fire-and-forget: a notifier logs its own failures and the
//! engine never waits on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SyncResult;
use crate::events::EngineEvent;

// =============================================================================
// Notification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

/// A message for the operator.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub level: NotifyLevel,
    /// Event name, e.g. `conflict:detected`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl Notification {
    /// Builds the notification for an event, if the event warrants one.
    ///
    /// Routine progress (items synced, batches) is logged by the engine and
    /// not forwarded.
    pub fn from_event(event: &EngineEvent) -> Option<Self> {
        let level = match event {
            EngineEvent::ConflictDetected { automatic: false, .. } => NotifyLevel::Warning,
            EngineEvent::ConflictDetected { .. } | EngineEvent::ConflictResolved { .. } => {
                NotifyLevel::Info
            }
            EngineEvent::SyncFailed { .. } | EngineEvent::StateLoadFailed { .. } => {
                NotifyLevel::Error
            }
            EngineEvent::PollFailed { .. } => NotifyLevel::Warning,
            EngineEvent::Started | EngineEvent::Stopped | EngineEvent::BackupRestored { .. } => {
                NotifyLevel::Info
            }
            EngineEvent::ItemSynced { .. }
            | EngineEvent::BatchCompleted { .. }
            | EngineEvent::BackupsSwept { .. } => return None,
        };

        Some(Notification {
            level,
            kind: event.name(),
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            at: Utc::now(),
        })
    }
}

// =============================================================================
// Notifier Trait
// =============================================================================

/// Delivers notifications. Implementations must not fail the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, n: Notification) {
        match n.level {
            NotifyLevel::Info => info!(kind = n.kind, payload = %n.payload, "Notification"),
            NotifyLevel::Warning => warn!(kind = n.kind, payload = %n.payload, "Notification"),
            NotifyLevel::Error => error!(kind = n.kind, payload = %n.payload, "Notification"),
        }
    }
}

/// POSTs each notification as JSON to a URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(WebhookNotifier {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, n: Notification) {
        let result = self.client.post(&self.url).json(&n).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(kind = n.kind, "Webhook delivered");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(kind = n.kind, %status, body = %body, "Webhook rejected notification");
            }
            Err(e) => warn!(?e, kind = n.kind, "Webhook delivery failed"),
        }
    }
}

/// Sends every notification to several notifiers in turn.
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        FanoutNotifier { notifiers }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, n: Notification) {
        for notifier in &self.notifiers {
            notifier.notify(n.clone()).await;
        }
    }
}

// =============================================================================
// Forwarder
// =============================================================================

/// Spawns a task that turns engine events into notifications.
///
/// The task ends when the event channel closes, after delivering
/// [`EngineEvent::Stopped`].
pub fn spawn_forwarder(
    mut events: broadcast::Receiver<EngineEvent>,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let stop = event == EngineEvent::Stopped;
                    if let Some(n) = Notification::from_event(&event) {
                        notifier.notify(n).await;
                    }
                    if stop {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notifier fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Notification forwarder stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;
    use wikisync_core::{ConflictKind, SyncKey};

    #[derive(Default)]
    struct Recording(Mutex<Vec<Notification>>);

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, n: Notification) {
            self.0.lock().await.push(n);
        }
    }

    #[test]
    fn test_routine_events_are_not_forwarded() {
        assert!(Notification::from_event(&EngineEvent::BatchCompleted {
            processed: 1,
            synced: 1,
            conflicts: 0,
            failed: 0,
        })
        .is_none());

        let n = Notification::from_event(&EngineEvent::PollFailed {
            message: "timeout".into(),
        })
        .unwrap();
        assert_eq!(n.level, NotifyLevel::Warning);
        assert_eq!(n.kind, "poll:failed");
    }

    #[tokio::test]
    async fn test_forwarder_delivers_until_stopped() {
        let (tx, rx) = broadcast::channel(16);
        let recording = Arc::new(Recording::default());
        let handle = spawn_forwarder(rx, recording.clone());

        tx.send(EngineEvent::ConflictDetected {
            id: uuid::Uuid::new_v4(),
            key: SyncKey::new("a.md").unwrap(),
            kind: ConflictKind::Structural,
            automatic: false,
        })
        .unwrap();
        tx.send(EngineEvent::Stopped).unwrap();
        handle.await.unwrap();

        let seen = recording.0.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, "conflict:detected");
        assert_eq!(seen[0].level, NotifyLevel::Warning);
        assert_eq!(seen[1].kind, "engine:stopped");
    }
}
