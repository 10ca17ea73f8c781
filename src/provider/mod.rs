//! Broker provider trait: the transport abstraction under the publisher and
//! the consumers
//!
//! Providers move opaque records between topics and consumer groups. They
//! know nothing about event types; that lives in the publisher and the
//! handler registry.

use crate::config::{Acks, OffsetReset};
use crate::error::Result;
use crate::types::{BrokerRecord, OutgoingMessage};
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub mod nats;

/// Core trait for broker backends
///
/// `send` must be callable concurrently from many units of work; providers
/// must not serialise callers behind one another's broker round-trip.
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    /// Send a message and wait for the broker acknowledgement
    ///
    /// Returns the broker-assigned sequence number. Fails with
    /// `EventError::Timeout` if not acknowledged within `timeout`.
    async fn send(&self, message: OutgoingMessage, acks: Acks, timeout: Duration) -> Result<u64>;

    /// Join `group` on `topic` with manual offset commit
    ///
    /// A group seen for the first time starts at `reset`; otherwise it
    /// resumes after its last committed record.
    async fn subscribe(
        &self,
        group: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>>;

    /// Get provider info (message count, etc.)
    async fn info(&self) -> Result<ProviderInfo>;

    /// Provider name (e.g., "nats", "memory")
    fn name(&self) -> &str;

    /// Health check: returns true if the provider is connected and operational
    ///
    /// Default implementation delegates to `info()` and returns true if it succeeds.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Pull handle for one (group, topic) pair
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next record
    ///
    /// Returns `Ok(None)` when nothing arrived in time. The returned record
    /// is not committed until [`PendingRecord::ack`] is called.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<PendingRecord>>;
}

type AckFn = Box<dyn FnOnce() -> futures::future::BoxFuture<'static, Result<()>> + Send>;

/// A record pending acknowledgement
pub struct PendingRecord {
    /// The received record
    pub record: BrokerRecord,

    /// Ack callback, commits the record's offset for the group
    ack_fn: AckFn,

    /// Nak callback, requests redelivery
    nak_fn: AckFn,
}

impl PendingRecord {
    /// Create a new pending record with ack/nak callbacks
    pub fn new(
        record: BrokerRecord,
        ack_fn: impl FnOnce() -> futures::future::BoxFuture<'static, Result<()>> + Send + 'static,
        nak_fn: impl FnOnce() -> futures::future::BoxFuture<'static, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            record,
            ack_fn: Box::new(ack_fn),
            nak_fn: Box::new(nak_fn),
        }
    }

    /// Commit: the record was handled (or dead-lettered) and must not return
    pub async fn ack(self) -> Result<()> {
        (self.ack_fn)().await
    }

    /// Leave uncommitted and ask for redelivery
    pub async fn nak(self) -> Result<()> {
        (self.nak_fn)().await
    }
}

impl std::fmt::Debug for PendingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRecord")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Provider status information
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// Provider name
    pub provider: String,
    /// Total messages stored
    pub messages: u64,
    /// Total bytes used
    pub bytes: u64,
    /// Number of active consumers/subscribers
    pub consumers: usize,
}
