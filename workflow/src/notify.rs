//! Notification Gateway: where SLA and escalation events go.
//!
//! SLA events are batched per tick (one event carries every affected
//! incident); escalation events are per incident.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// An event for the notification gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    SlaWarning { incident_ids: Vec<String> },
    SlaViolation { incident_ids: Vec<String> },
    Escalation { incident_id: String },
}

impl Notification {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SlaWarning { .. } => "sla_warning",
            Self::SlaViolation { .. } => "sla_violation",
            Self::Escalation { .. } => "escalation",
        }
    }

    /// Incident IDs this event concerns.
    pub fn incident_ids(&self) -> Vec<&str> {
        match self {
            Self::SlaWarning { incident_ids } | Self::SlaViolation { incident_ids } => {
                incident_ids.iter().map(String::as_str).collect()
            }
            Self::Escalation { incident_id } => vec![incident_id.as_str()],
        }
    }
}

/// Error type for notification delivery
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to deliver notification: {0}")]
    DeliveryFailed(String),

    #[error("Notification timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type for notification delivery
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Shared reference to a notification sink
pub type SharedNotifier = Arc<dyn NotificationSink>;

/// Accepts SLA and escalation events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> NotifyResult<()>;
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify(&self, _notification: Notification) -> NotifyResult<()> {
        Ok(())
    }
}

/// Writes each event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(&self, notification: Notification) -> NotifyResult<()> {
        match &notification {
            Notification::SlaViolation { incident_ids } => {
                warn!(count = incident_ids.len(), ids = ?incident_ids, "SLA violation");
            }
            Notification::SlaWarning { incident_ids } => {
                info!(count = incident_ids.len(), ids = ?incident_ids, "SLA warning");
            }
            Notification::Escalation { incident_id } => {
                warn!(incident_id = %incident_id, "Incident escalated");
            }
        }
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.sent()
            .iter()
            .filter(|n| n.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotifier {
    async fn notify(&self, notification: Notification) -> NotifyResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
        Ok(())
    }
}

/// Fans events out to in-process subscribers over a broadcast channel.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn notify(&self, notification: Notification) -> NotifyResult<()> {
        let event_type = notification.event_type();
        match self.sender.send(notification) {
            Ok(count) => debug!(event_type, receivers = count, "Notification published"),
            // No receivers is OK
            Err(_) => debug!(event_type, "Notification published (no receivers)"),
        }
        Ok(())
    }
}
