//! Error types for pms-event

use thiserror::Error;

/// Errors that can occur in the messaging core
#[derive(Debug, Error)]
pub enum EventError {
    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failure (broker unreachable, rejected, ack failed)
    #[error("Failed to publish event to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe {
        topic: String,
        reason: String,
    },

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Incoming bytes could not be decoded into the registered event type
    #[error("Failed to decode '{event_type}': {reason}")]
    Deserialization {
        event_type: String,
        reason: String,
    },

    /// The local data-store commit failed; nothing was published
    #[error("Local commit failed: {0}")]
    LocalCommit(String),

    /// Two handlers registered for the same event type or topic
    #[error("A handler is already registered for '{event_type}'")]
    DuplicateHandler {
        event_type: String,
    },

    /// A message handler returned an error
    #[error("Handler for '{event_type}' failed: {reason}")]
    Handler {
        event_type: String,
        reason: String,
    },

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Acknowledgement (offset commit) failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream/topic creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Entity or subscription not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider not available or misbehaving
    #[error("Provider error: {0}")]
    Provider(String),

    /// Local store used by a handler failed
    #[error("Store error: {0}")]
    Store(String),
}

impl EventError {
    /// Build a handler error for the given event type
    pub fn handler(event_type: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Handler {
            event_type: event_type.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error marks a record that can never be processed
    ///
    /// Poison records are dead-lettered immediately instead of being retried.
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::Deserialization { .. })
    }
}

/// Result type alias for messaging operations
pub type Result<T> = std::result::Result<T, EventError>;
