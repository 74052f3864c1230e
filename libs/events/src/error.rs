//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when publishing or consuming events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The topic has no live channel.
    #[error("topic {0} is closed")]
    TopicClosed(String),

    /// A subscriber fell behind and missed events.
    #[error("subscriber on topic {topic} lagged, {skipped} events skipped")]
    Lagged { topic: String, skipped: u64 },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
