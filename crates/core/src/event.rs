//! Domain event system — decoupled communication between services.
//!
//! Events are published when assignments change, a sweep completes, or a
//! notification goes out. Subscribers (the `serve` command's event log,
//! tests) react without the services knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::notification::ThresholdClass;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An administrator granted dashboards to a user
    AssignmentsGranted {
        user_id: String,
        resource_refs: Vec<String>,
        email_sent: bool,
        timestamp: DateTime<Utc>,
    },

    /// An administrator revoked dashboards from a user
    AssignmentsRevoked {
        user_id: String,
        removed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A sweep finished and purged expired grants
    SweepCompleted {
        removed: usize,
        users_affected: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An expiry notice was delivered and recorded
    NotificationSent {
        user_id: String,
        class: ThresholdClass,
        assignments: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::AssignmentsGranted { .. } => "assignments_granted",
            DomainEvent::AssignmentsRevoked { .. } => "assignments_revoked",
            DomainEvent::SweepCompleted { .. } => "sweep_completed",
            DomainEvent::NotificationSent { .. } => "notification_sent",
            DomainEvent::ErrorOccurred { .. } => "error",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::AssignmentsGranted { timestamp, .. }
            | DomainEvent::AssignmentsRevoked { timestamp, .. }
            | DomainEvent::SweepCompleted { timestamp, .. }
            | DomainEvent::NotificationSent { timestamp, .. }
            | DomainEvent::ErrorOccurred { timestamp, .. } => *timestamp,
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
