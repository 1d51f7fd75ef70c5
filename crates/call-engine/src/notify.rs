//! Lifecycle notification sink
//!
//! Every committed transition emits exactly one [`CallNotification`].
//! Delivery is best-effort: a sink failure is logged by the lifecycle engine
//! and never rolls back the state change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::CallId;

/// What happened to the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    IncomingCall,
    OutgoingCall,
    CallConnected,
    CallEnded,
    CallFailed,
}

/// One lifecycle notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallNotification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(rename = "callId")]
    pub call_id: CallId,
    /// Snapshot of the call record at the time of the transition
    pub data: serde_json::Value,
}

/// Receives lifecycle notifications; no acknowledgment required
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: CallNotification) -> anyhow::Result<()>;
}

/// In-process fan-out over a broadcast channel
pub struct BroadcastSink {
    tx: broadcast::Sender<CallNotification>,
}

impl BroadcastSink {
    /// Create a sink with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the notification feed
    pub fn subscribe(&self) -> broadcast::Receiver<CallNotification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn notify(&self, notification: CallNotification) -> anyhow::Result<()> {
        // A send error only means there are no subscribers right now
        let _ = self.tx.send(notification);
        Ok(())
    }
}

/// Discards everything; for tests and headless deployments
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, _notification: CallNotification) -> anyhow::Result<()> {
        Ok(())
    }
}
