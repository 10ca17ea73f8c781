//! Dead-letter routing for records that cannot be handled
//!
//! A record is dead-lettered when it cannot be decoded, when no handler is
//! registered for its topic, or when its handler keeps failing until the
//! delivery limit. The consumer commits past it afterwards, so the loop never
//! stalls on one bad record.

use crate::config::Acks;
use crate::error::Result;
use crate::provider::BrokerProvider;
use crate::types::{
    BrokerRecord, OutgoingMessage, HEADER_BROKER_MSG_ID, HEADER_DEAD_LETTER_ATTEMPTS,
    HEADER_DEAD_LETTER_REASON,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Suffix appended to a topic to name its dead-letter topic
pub const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// A record that was given up on, with the reason
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The record as received
    pub record: BrokerRecord,

    /// Event type tag the consumer expected on this topic, if any
    pub event_type: Option<String>,

    pub reason: String,

    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(record: BrokerRecord, event_type: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            record,
            event_type,
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Destination for dead-lettered records
#[async_trait]
pub trait DlqHandler: Send + Sync {
    /// Take ownership of a dead-lettered record
    ///
    /// An error here means the record could not be parked; the consumer
    /// then leaves it uncommitted.
    async fn handle(&self, dead_letter: DeadLetter) -> Result<()>;

    /// Number of records dead-lettered through this handler
    async fn count(&self) -> Result<usize>;

    /// Most recent dead letters, newest first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}

/// In-memory DLQ handler for development and testing
///
/// Keeps at most `max_events` dead letters; the oldest are dropped first.
pub struct MemoryDlqHandler {
    events: Arc<RwLock<VecDeque<DeadLetter>>>,
    max_events: usize,
}

impl MemoryDlqHandler {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            max_events,
        }
    }
}

impl Default for MemoryDlqHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DlqHandler for MemoryDlqHandler {
    async fn handle(&self, dead_letter: DeadLetter) -> Result<()> {
        tracing::warn!(
            topic = %dead_letter.record.topic,
            sequence = dead_letter.record.sequence,
            event_id = ?dead_letter.record.event_id(),
            num_delivered = dead_letter.record.num_delivered,
            reason = %dead_letter.reason,
            "Record dead-lettered"
        );

        let mut events = self.events.write().await;
        events.push_back(dead_letter);
        if self.max_events > 0 {
            while events.len() > self.max_events {
                events.pop_front();
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.events.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}

/// Republishes dead letters to `<topic>.dead-letter` on the broker
///
/// The payload is forwarded untouched; the reason and delivery count travel
/// as headers next to the original event headers. The copy gets its own
/// broker dedup id, and a send the broker reports as a duplicate counts as
/// a failure, so the source record is only committed once the copy is stored.
pub struct BrokerDlqHandler {
    provider: Arc<dyn BrokerProvider>,
    timeout: Duration,
    count: AtomicUsize,
    recent: MemoryDlqHandler,
}

impl BrokerDlqHandler {
    pub fn new(provider: Arc<dyn BrokerProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            count: AtomicUsize::new(0),
            recent: MemoryDlqHandler::new(100),
        }
    }

    /// Dead-letter topic for a source topic
    pub fn topic_for(topic: &str) -> String {
        format!("{}{}", topic, DEAD_LETTER_SUFFIX)
    }

    /// Dedup key of the dead-letter copy: `<event id>:dead-letter:<sequence>:<attempt>`
    pub fn key_for(record: &BrokerRecord) -> String {
        let origin = record
            .event_id()
            .map(|id| id.to_string())
            .or_else(|| record.key.clone())
            .unwrap_or_else(|| record.topic.clone());
        format!(
            "{}:dead-letter:{}:{}",
            origin, record.sequence, record.num_delivered
        )
    }
}

#[async_trait]
impl DlqHandler for BrokerDlqHandler {
    async fn handle(&self, dead_letter: DeadLetter) -> Result<()> {
        let record = &dead_letter.record;
        let mut message = OutgoingMessage::new(Self::topic_for(&record.topic), record.payload.clone())
            .with_key(Self::key_for(record))
            .with_header(HEADER_DEAD_LETTER_REASON, dead_letter.reason.clone())
            .with_header(HEADER_DEAD_LETTER_ATTEMPTS, record.num_delivered.to_string())
            .require_new();
        for (name, value) in &record.headers {
            if name == HEADER_BROKER_MSG_ID {
                continue;
            }
            message.headers.entry(name.clone()).or_insert_with(|| value.clone());
        }

        let sequence = self.provider.send(message, Acks::All, self.timeout).await?;
        self.count.fetch_add(1, Ordering::Relaxed);

        tracing::warn!(
            topic = %record.topic,
            dead_letter_sequence = sequence,
            num_delivered = record.num_delivered,
            reason = %dead_letter.reason,
            "Record forwarded to dead-letter topic"
        );

        self.recent.handle(dead_letter).await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.count.load(Ordering::Relaxed))
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        self.recent.list(limit).await
    }
}

/// Whether a record has used up its deliveries (`max_deliveries == 0` never gives up)
pub fn should_dead_letter(record: &BrokerRecord, max_deliveries: u64) -> bool {
    max_deliveries > 0 && record.num_delivered >= max_deliveries
}
