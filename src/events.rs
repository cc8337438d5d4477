//! Push notifications published by the engine
//!
//! A single broadcast channel carries every topic, so ordering is preserved
//! per topic and across topics. Delivery is at-most-once: a subscriber that
//! falls behind the channel capacity loses the oldest events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{ProtectedApp, SecurityLog, SecurityPolicy, ShieldStatus};

/// One push notification, tagged with its topic name on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "kebab-case")]
pub enum ShieldEvent {
    SecurityLog(SecurityLog),
    ShieldStatus(ShieldStatus),
    AppAdded(ProtectedApp),
    AppRemoved(String),
    ProcessKilled { pid: u32, name: String },
    AutoLocked(bool),
    PolicyToggled(SecurityPolicy),
}

impl ShieldEvent {
    /// Topic name as seen by subscribers
    pub fn topic(&self) -> &'static str {
        match self {
            ShieldEvent::SecurityLog(_) => "security-log",
            ShieldEvent::ShieldStatus(_) => "shield-status",
            ShieldEvent::AppAdded(_) => "app-added",
            ShieldEvent::AppRemoved(_) => "app-removed",
            ShieldEvent::ProcessKilled { .. } => "process-killed",
            ShieldEvent::AutoLocked(_) => "auto-locked",
            ShieldEvent::PolicyToggled(_) => "policy-toggled",
        }
    }
}

/// Cloneable publisher handle shared by every component
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ShieldEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish without blocking; having no subscribers is not an error
    pub fn publish(&self, event: ShieldEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShieldEvent> {
        self.sender.subscribe()
    }
}
