//! Event envelope - the common wrapper for published events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MicroVmEvent;

/// The event envelope delivered to topic subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique envelope ID (ULID string).
    pub id: String,

    /// Namespace of the microVM the event refers to.
    pub namespace: String,

    /// Topic the event was published on.
    pub topic: String,

    /// When the event was published.
    pub timestamp: DateTime<Utc>,

    pub event: MicroVmEvent,
}

impl EventEnvelope {
    /// Wraps an event for publication on `topic`.
    pub fn new(topic: impl Into<String>, event: MicroVmEvent) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            namespace: event.data().namespace.clone(),
            topic: topic.into(),
            timestamp: Utc::now(),
            event,
        }
    }
}
