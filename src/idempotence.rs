//! Consumer-side deduplication by event id
//!
//! [`Idempotent`] wraps any handler so a redelivered event is applied once.
//! The event is marked processed only after the inner handler succeeds, so a
//! failure part-way leaves it eligible for the retry.

use crate::error::Result;
use crate::event::IntegrationEvent;
use crate::registry::MessageHandler;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Ledger of events a consumer has already applied
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn is_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool>;

    /// Record `event_id` as applied; returns `false` if it already was
    async fn mark_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool>;
}

/// In-memory processed-event ledger
#[derive(Debug, Default)]
pub struct MemoryProcessedEventStore {
    seen: RwLock<HashSet<(String, Uuid)>>,
}

impl MemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.read().await.is_empty()
    }
}

#[async_trait]
impl ProcessedEventStore for MemoryProcessedEventStore {
    async fn is_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool> {
        Ok(self
            .seen
            .read()
            .await
            .contains(&(consumer.to_string(), event_id)))
    }

    async fn mark_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool> {
        Ok(self.seen.write().await.insert((consumer.to_string(), event_id)))
    }
}

/// Handler wrapper that skips events already applied by `consumer`
pub struct Idempotent<H> {
    inner: H,
    store: Arc<dyn ProcessedEventStore>,
    consumer: String,
}

impl<H> Idempotent<H> {
    pub fn new(inner: H, store: Arc<dyn ProcessedEventStore>, consumer: impl Into<String>) -> Self {
        Self {
            inner,
            store,
            consumer: consumer.into(),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<E, H> MessageHandler<E> for Idempotent<H>
where
    E: IntegrationEvent,
    H: MessageHandler<E>,
{
    async fn handle(&self, event: E, cancel: CancellationToken) -> Result<()> {
        let event_id = event.event_id();
        if self.store.is_processed(&self.consumer, event_id).await? {
            tracing::debug!(
                consumer = %self.consumer,
                event_type = E::EVENT_TYPE,
                event_id = %event_id,
                "Event already processed; skipping"
            );
            return Ok(());
        }

        self.inner.handle(event, cancel).await?;
        self.store.mark_processed(&self.consumer, event_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::SiteCreatedEvent;
    use crate::error::EventError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Counter {
        calls: AtomicUsize,
        fail_once: AtomicBool,
    }

    impl Counter {
        fn new(fail_once: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_once: AtomicBool::new(fail_once),
            }
        }
    }

    #[async_trait]
    impl MessageHandler<SiteCreatedEvent> for Counter {
        async fn handle(&self, _event: SiteCreatedEvent, _cancel: CancellationToken) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(EventError::Store("locked".to_string()));
            }
            Ok(())
        }
    }

    fn site() -> SiteCreatedEvent {
        SiteCreatedEvent::builder(Uuid::new_v4(), "Lot A", "موقف", "/lots").build()
    }

    #[tokio::test]
    async fn test_second_delivery_is_skipped() {
        let store = Arc::new(MemoryProcessedEventStore::new());
        let handler = Idempotent::new(Counter::new(false), store.clone(), "booking");
        let event = site();

        handler.handle(event.clone(), CancellationToken::new()).await.unwrap();
        handler.handle(event.clone(), CancellationToken::new()).await.unwrap();

        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 1);
        assert!(store.is_processed("booking", event.event_id()).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_marked() {
        let store = Arc::new(MemoryProcessedEventStore::new());
        let handler = Idempotent::new(Counter::new(true), store.clone(), "booking");
        let event = site();

        assert!(handler.handle(event.clone(), CancellationToken::new()).await.is_err());
        assert!(store.is_empty().await);

        handler.handle(event.clone(), CancellationToken::new()).await.unwrap();
        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 2);
        assert!(store.is_processed("booking", event.event_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_ledger_is_per_consumer() {
        let store = MemoryProcessedEventStore::new();
        let id = Uuid::new_v4();

        assert!(store.mark_processed("booking", id).await.unwrap());
        assert!(!store.mark_processed("booking", id).await.unwrap());
        assert!(!store.is_processed("invoice", id).await.unwrap());
    }
}
