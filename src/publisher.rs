//! Message publisher
//!
//! Turns a staged event into a broker message on the topic derived from its
//! type and waits for the broker acknowledgement. One attempt per call;
//! retrying is the caller's decision.

use crate::config::ProducerOptions;
use crate::error::{EventError, Result};
use crate::event::{IntegrationEvent, StagedEvent};
use crate::provider::BrokerProvider;
use crate::resolver::{DefaultNameResolver, NameResolver};
use crate::types::{OutgoingMessage, PublishReceipt, HEADER_EVENT_ID, HEADER_EVENT_TYPE};
use async_trait::async_trait;
use std::sync::Arc;

/// Publishes integration events to the broker
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Serialize and send one event, waiting for the broker ack
    async fn publish(&self, event: &StagedEvent) -> Result<PublishReceipt>;

    /// Topic `event` is published on
    fn topic_for(&self, event: &StagedEvent) -> String {
        event.topic()
    }
}

/// Typed convenience over [`MessagePublisher`]
#[async_trait]
pub trait MessagePublisherExt: MessagePublisher {
    /// Publish a concrete event directly, bypassing a staging queue
    async fn publish_event<E: IntegrationEvent>(&self, event: &E) -> Result<PublishReceipt> {
        self.publish(&StagedEvent::new(event.clone())).await
    }
}

impl<P: MessagePublisher + ?Sized> MessagePublisherExt for P {}

/// [`MessagePublisher`] backed by a [`BrokerProvider`]
///
/// Holds no lock across the broker round-trip; share one instance (behind an
/// `Arc`) between all units of work in a process.
pub struct BrokerPublisher<R = DefaultNameResolver> {
    provider: Arc<dyn BrokerProvider>,
    resolver: R,
    options: ProducerOptions,
}

impl BrokerPublisher {
    /// Publisher with the default topic resolver
    ///
    /// Fails with `EventError::Config` unless `options` require acks from
    /// every in-sync replica within a non-zero timeout.
    pub fn new(provider: Arc<dyn BrokerProvider>, options: ProducerOptions) -> Result<Self> {
        Self::with_resolver(provider, DefaultNameResolver, options)
    }
}

impl<R: NameResolver> BrokerPublisher<R> {
    /// Publisher with a custom topic resolver
    pub fn with_resolver(
        provider: Arc<dyn BrokerProvider>,
        resolver: R,
        options: ProducerOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            provider,
            resolver,
            options,
        })
    }

    /// Provider this publisher sends through
    pub fn provider(&self) -> &Arc<dyn BrokerProvider> {
        &self.provider
    }

    fn build_message(&self, event: &StagedEvent) -> Result<OutgoingMessage> {
        let event_id = event.event_id().to_string();
        Ok(OutgoingMessage::new(self.topic_for(event), event.encode()?)
            .with_key(event_id.clone())
            .with_header(HEADER_EVENT_TYPE, event.event_type())
            .with_header(HEADER_EVENT_ID, event_id))
    }
}

#[async_trait]
impl<R: NameResolver> MessagePublisher for BrokerPublisher<R> {
    fn topic_for(&self, event: &StagedEvent) -> String {
        self.resolver.resolve(event.event_type())
    }

    async fn publish(&self, event: &StagedEvent) -> Result<PublishReceipt> {
        let message = self.build_message(event)?;
        let topic = message.topic.clone();

        let sequence = self
            .provider
            .send(message, self.options.acks, self.options.publish_timeout())
            .await
            .map_err(|e| match e {
                EventError::Timeout(_) | EventError::Publish { .. } => e,
                other => EventError::Publish {
                    topic: topic.clone(),
                    reason: other.to_string(),
                },
            })?;

        tracing::debug!(
            event_id = %event.event_id(),
            event_type = event.event_type(),
            topic = %topic,
            sequence,
            provider = self.provider.name(),
            "Event published"
        );

        Ok(PublishReceipt {
            topic,
            sequence,
            event_id: event.event_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Acks;
    use crate::contracts::SiteCreatedEvent;
    use crate::provider::memory::MemoryProvider;
    use crate::uow::{NoopTransaction, UnitOfWork};
    use std::time::Duration;
    use uuid::Uuid;

    fn publisher(provider: &MemoryProvider) -> BrokerPublisher {
        BrokerPublisher::new(Arc::new(provider.clone()), ProducerOptions::default()).unwrap()
    }

    fn site(name: &str) -> SiteCreatedEvent {
        SiteCreatedEvent::builder(Uuid::new_v4(), name, "موقف", "/lots").build()
    }

    #[tokio::test]
    async fn test_publish_routes_by_event_type() {
        let provider = MemoryProvider::default();
        let event = site("Lot A");

        let receipt = publisher(&provider).publish_event(&event).await.unwrap();
        assert_eq!(receipt.topic, "site-created");
        assert_eq!(receipt.sequence, 1);
        assert_eq!(receipt.event_id, event.event_id());

        let records = provider.records("site-created");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type(), Some("SiteCreatedEvent"));
        assert_eq!(records[0].event_id(), Some(event.event_id()));
        assert_eq!(records[0].key.as_deref(), Some(event.event_id().to_string().as_str()));

        let body: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(body["nameEn"], "Lot A");
        assert_eq!(body["eventId"], event.event_id().to_string());
    }

    #[tokio::test]
    async fn test_broker_down_is_publish_error() {
        let provider = MemoryProvider::default();
        provider.set_available(false);

        let err = publisher(&provider)
            .publish(&StagedEvent::new(site("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Publish { ref topic, .. } if topic == "site-created"));
    }

    #[tokio::test]
    async fn test_ack_timeout_is_timeout_error() {
        let provider = MemoryProvider::default();
        provider.set_send_delay(Duration::from_millis(200));
        let publisher = BrokerPublisher::new(
            Arc::new(provider.clone()),
            ProducerOptions {
                publish_timeout_ms: 20,
                ..Default::default()
            },
        )
        .unwrap();

        let err = publisher.publish(&StagedEvent::new(site("x"))).await.unwrap_err();
        assert!(matches!(err, EventError::Timeout(_)));
        assert!(provider.records("site-created").is_empty());
    }

    #[test]
    fn test_rejects_weak_producer_options() {
        let provider: Arc<dyn BrokerProvider> = Arc::new(MemoryProvider::default());
        for acks in [Acks::None, Acks::Leader] {
            let result = BrokerPublisher::new(
                provider.clone(),
                ProducerOptions {
                    acks,
                    ..Default::default()
                },
            );
            assert!(matches!(result, Err(EventError::Config(_))));
        }

        let result = BrokerPublisher::new(
            provider,
            ProducerOptions {
                publish_timeout_ms: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(EventError::Config(_))));
    }

    struct Prefixed;

    impl NameResolver for Prefixed {
        fn resolve(&self, type_name: &str) -> String {
            format!("pms.{}", crate::resolver::resolve_topic(type_name))
        }
    }

    #[tokio::test]
    async fn test_custom_resolver() {
        let provider = MemoryProvider::default();
        let publisher = BrokerPublisher::with_resolver(
            Arc::new(provider.clone()),
            Prefixed,
            ProducerOptions::default(),
        )
        .unwrap();

        let receipt = publisher.publish_event(&site("x")).await.unwrap();
        assert_eq!(receipt.topic, "pms.site-created");
        assert_eq!(provider.records("pms.site-created").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_reports_resolved_topic() {
        let provider = MemoryProvider::default();
        provider.set_available(false);
        let publisher: Arc<dyn MessagePublisher> = Arc::new(
            BrokerPublisher::with_resolver(Arc::new(provider.clone()), Prefixed, ProducerOptions::default())
                .unwrap(),
        );

        let event = site("x");
        assert_eq!(publisher.topic_for(&StagedEvent::new(event.clone())), "pms.site-created");

        let mut uow = UnitOfWork::new(NoopTransaction, publisher);
        uow.enqueue(event);
        let report = uow.commit().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("pms.site-created"));
    }
}
