//! Broker-level message types
//!
//! These are what providers move around: opaque payload bytes plus routing
//! data. Typed events live in [`crate::event`].

use bytes::Bytes;
use std::collections::HashMap;
use uuid::Uuid;

/// Header carrying the event type tag
pub const HEADER_EVENT_TYPE: &str = "pms-event-type";

/// Header carrying the event id
pub const HEADER_EVENT_ID: &str = "pms-event-id";

/// Header set on dead-lettered records
pub const HEADER_DEAD_LETTER_REASON: &str = "pms-dead-letter-reason";

/// Header set on dead-lettered records: delivery attempts before giving up
pub const HEADER_DEAD_LETTER_ATTEMPTS: &str = "pms-dead-letter-attempts";

/// Broker dedup id; JetStream drops a second message with the same value
pub const HEADER_BROKER_MSG_ID: &str = "Nats-Msg-Id";

/// A message ready to be sent to a broker topic
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Destination topic (resolved event name)
    pub topic: String,

    /// Optional message key; providers use it for dedup or partitioning
    pub key: Option<String>,

    /// String headers
    pub headers: HashMap<String, String>,

    /// Encoded event
    pub payload: Bytes,

    /// Fail the send if the broker reports it as a duplicate of an earlier
    /// message instead of storing it
    pub require_new: bool,
}

impl OutgoingMessage {
    /// Create an unkeyed message without headers
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            headers: HashMap::new(),
            payload: payload.into(),
            require_new: false,
        }
    }

    /// Set the message key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Treat a broker-side duplicate as a failed send
    pub fn require_new(mut self) -> Self {
        self.require_new = true;
        self
    }
}

/// A record read from a broker topic
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    /// Topic the record was read from
    pub topic: String,

    /// Message key, if the producer set one
    pub key: Option<String>,

    /// String headers
    pub headers: HashMap<String, String>,

    /// Encoded event
    pub payload: Bytes,

    /// Provider-assigned position in the topic (1-based)
    pub sequence: u64,

    /// Number of times this record has been delivered to the group
    pub num_delivered: u64,
}

impl BrokerRecord {
    /// Event type tag from headers, if present
    pub fn event_type(&self) -> Option<&str> {
        self.headers.get(HEADER_EVENT_TYPE).map(String::as_str)
    }

    /// Event id from headers, if present and well-formed
    pub fn event_id(&self) -> Option<Uuid> {
        self.headers
            .get(HEADER_EVENT_ID)
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Topic the event landed on
    pub topic: String,

    /// Broker sequence number
    pub sequence: u64,

    /// Id of the published event
    pub event_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_builder() {
        let msg = OutgoingMessage::new("site-created", b"{}".to_vec())
            .with_key("k-1")
            .with_header(HEADER_EVENT_TYPE, "SiteCreatedEvent");

        assert_eq!(msg.topic, "site-created");
        assert_eq!(msg.key.as_deref(), Some("k-1"));
        assert_eq!(msg.headers[HEADER_EVENT_TYPE], "SiteCreatedEvent");
        assert_eq!(&msg.payload[..], b"{}");
    }

    #[test]
    fn test_record_header_accessors() {
        let id = Uuid::new_v4();
        let mut headers = HashMap::new();
        headers.insert(HEADER_EVENT_TYPE.to_string(), "BookingCreatedEvent".to_string());
        headers.insert(HEADER_EVENT_ID.to_string(), id.to_string());

        let record = BrokerRecord {
            topic: "booking-created".to_string(),
            key: None,
            headers,
            payload: Bytes::from_static(b"{}"),
            sequence: 1,
            num_delivered: 1,
        };

        assert_eq!(record.event_type(), Some("BookingCreatedEvent"));
        assert_eq!(record.event_id(), Some(id));
    }

    #[test]
    fn test_record_bad_event_id_header() {
        let mut headers = HashMap::new();
        headers.insert(HEADER_EVENT_ID.to_string(), "not-a-uuid".to_string());
        let record = BrokerRecord {
            topic: "t".to_string(),
            key: None,
            headers,
            payload: Bytes::new(),
            sequence: 1,
            num_delivered: 1,
        };
        assert!(record.event_id().is_none());
        assert!(record.event_type().is_none());
    }
}
