//! NATS JetStream integration tests
//!
//! These tests require a running NATS server with JetStream enabled:
//!   nats-server -js
//!
//! Tests are skipped automatically if NATS is not available.

use pms_event::handlers::{
    InvoiceOnBookingHandler, MemoryErpGateway, MemoryInvoiceLedger, MemorySiteReplicaStore,
    SiteReplicaHandler, SiteReplicaStore,
};
use pms_event::provider::nats::{NatsConfig, NatsProvider, StorageType};
use pms_event::types::{HEADER_DEAD_LETTER_REASON, HEADER_EVENT_ID, HEADER_EVENT_TYPE};
use pms_event::{
    Acks, BookingCreatedEvent, BrokerDlqHandler, BrokerProvider, BrokerPublisher, ConsumerHost,
    ConsumerOptions, EventError, HandlerRegistry, IntegrationEvent, MemoryDlqHandler,
    MessageConsumer, MessagingConfig, MessagePublisher, MessagePublisherExt, NoopTransaction, OffsetReset,
    OutgoingMessage, ProducerOptions, SiteCreatedEvent, StagedEvent, Subscription, UnitOfWork,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Try to connect to NATS. Returns None if server is unavailable.
async fn try_nats_provider(stream_suffix: &str) -> Option<Arc<NatsProvider>> {
    let config = NatsConfig {
        url: "nats://127.0.0.1:4222".to_string(),
        stream_name: format!("TEST_PMS_{}", stream_suffix.to_uppercase()),
        subject_prefix: format!("test.pms.{}", stream_suffix),
        storage: StorageType::Memory,
        max_events: 10_000,
        max_age_secs: 60,
        ..Default::default()
    }
    .with_messaging(&MessagingConfig::for_service("pms-event-tests"));

    match NatsProvider::connect(config).await {
        Ok(provider) => Some(Arc::new(provider)),
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            None
        }
    }
}

/// Connect to NATS, or skip the test
macro_rules! nats_provider {
    ($suffix:expr) => {
        match try_nats_provider($suffix).await {
            Some(p) => p,
            None => return,
        }
    };
}

fn publisher(provider: &Arc<NatsProvider>) -> BrokerPublisher {
    BrokerPublisher::new(provider.clone(), ProducerOptions::default()).unwrap()
}

fn site(name: &str) -> SiteCreatedEvent {
    SiteCreatedEvent::builder(Uuid::new_v4(), name, "موقف", "/riyadh").build()
}

#[tokio::test]
async fn test_nats_publish_and_consume() {
    let provider = nats_provider!("pub_consume");
    let event = site("Lot A");

    // Latest: the in-memory stream may hold records from earlier runs
    let group = format!("g-{}", Uuid::new_v4().simple());
    let mut sub = provider
        .subscribe(&group, "site-created", OffsetReset::Latest)
        .await
        .unwrap();

    let receipt = publisher(&provider).publish_event(&event).await.unwrap();
    assert_eq!(receipt.topic, "site-created");
    assert!(receipt.sequence > 0);

    let pending = sub.poll(Duration::from_secs(2)).await.unwrap().unwrap();

    assert_eq!(pending.record.topic, "site-created");
    assert_eq!(pending.record.event_type(), Some("SiteCreatedEvent"));
    assert_eq!(pending.record.event_id(), Some(event.event_id()));
    assert_eq!(pending.record.num_delivered, 1);

    let decoded: SiteCreatedEvent = pms_event::decode(&pending.record.payload).unwrap();
    assert_eq!(decoded, event);
    pending.ack().await.unwrap();

    provider.client().delete_consumer(&group, "site-created").await.unwrap();
}

#[tokio::test]
async fn test_nats_msg_id_dedup() {
    let provider = nats_provider!("dedup");
    let staged = StagedEvent::new(site("Lot B"));
    let publisher = publisher(&provider);

    let first = publisher.publish(&staged).await.unwrap();
    let second = publisher.publish(&staged).await.unwrap();
    assert_eq!(first.sequence, second.sequence, "Duplicate publish should be dropped by the server");
}

#[tokio::test]
async fn test_nats_require_new_rejects_duplicate() {
    let provider = nats_provider!("require_new");
    let message = OutgoingMessage::new("site-created", b"{}".to_vec())
        .with_key(Uuid::new_v4().to_string());

    provider
        .send(message.clone(), Acks::All, Duration::from_secs(5))
        .await
        .unwrap();
    let err = provider
        .send(message.require_new(), Acks::All, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Publish { .. }));
}

#[tokio::test]
async fn test_nats_poison_record_reaches_dead_letter_topic() {
    let provider = nats_provider!("poison");
    let group = format!("booking-{}", Uuid::new_v4().simple());
    let dlq_group = format!("ops-{}", Uuid::new_v4().simple());
    let dlq_topic = BrokerDlqHandler::topic_for("site-created");

    let mut parked = provider
        .subscribe(&dlq_group, &dlq_topic, OffsetReset::Latest)
        .await
        .unwrap();

    let mut registry = HandlerRegistry::new();
    registry
        .register::<SiteCreatedEvent, _>(SiteReplicaHandler::new(Arc::new(MemorySiteReplicaStore::new())))
        .unwrap();
    let consumer = MessageConsumer::new(
        provider.clone(),
        registry,
        Arc::new(BrokerDlqHandler::new(provider.clone(), Duration::from_secs(5))),
        ConsumerOptions {
            group_id: group.clone(),
            auto_offset_reset: OffsetReset::Latest,
            poll_timeout_ms: 200,
            ..Default::default()
        },
    )
    .unwrap();
    let host = ConsumerHost::start(consumer).await.unwrap();

    // Published with the event id as broker dedup id, like a real event
    let event_id = Uuid::new_v4();
    let poison = OutgoingMessage::new("site-created", b"{not json".to_vec())
        .with_key(event_id.to_string())
        .with_header(HEADER_EVENT_TYPE, "SiteCreatedEvent")
        .with_header(HEADER_EVENT_ID, event_id.to_string());
    provider
        .send(poison, Acks::All, Duration::from_secs(5))
        .await
        .unwrap();

    let copy = parked
        .poll(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("dead letter was not stored");
    assert_eq!(&copy.record.payload[..], b"{not json");
    assert_eq!(copy.record.event_id(), Some(event_id));
    assert!(copy.record.headers.contains_key(HEADER_DEAD_LETTER_REASON));
    assert_ne!(copy.record.key, Some(event_id.to_string()));
    copy.ack().await.unwrap();

    host.shutdown().await.unwrap();
    provider.client().delete_consumer(&group, "site-created").await.unwrap();
    provider.client().delete_consumer(&dlq_group, &dlq_topic).await.unwrap();
}

#[tokio::test]
async fn test_nats_nak_redelivers() {
    let provider = nats_provider!("nak");
    publisher(&provider).publish_event(&site("Lot C")).await.unwrap();

    let group = format!("g-{}", Uuid::new_v4().simple());
    let mut sub = provider
        .subscribe(&group, "site-created", OffsetReset::Earliest)
        .await
        .unwrap();

    let first = sub.poll(Duration::from_secs(2)).await.unwrap().unwrap();
    first.nak().await.unwrap();

    let again = sub.poll(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(again.record.num_delivered, 2);
    again.ack().await.unwrap();

    provider.client().delete_consumer(&group, "site-created").await.unwrap();
}

#[tokio::test]
async fn test_nats_end_to_end_site_replica() {
    let provider = nats_provider!("e2e_site");
    let store = Arc::new(MemorySiteReplicaStore::new());

    let mut registry = HandlerRegistry::new();
    registry
        .register::<SiteCreatedEvent, _>(SiteReplicaHandler::new(store.clone()))
        .unwrap();
    let group = format!("booking-{}", Uuid::new_v4().simple());
    let consumer = MessageConsumer::new(
        provider.clone(),
        registry,
        Arc::new(MemoryDlqHandler::default()),
        ConsumerOptions {
            group_id: group.clone(),
            poll_timeout_ms: 200,
            ..Default::default()
        },
    )
    .unwrap();
    let host = ConsumerHost::start(consumer).await.unwrap();

    let event = site("Lot D");
    let site_id = event.site_id();
    let shared: Arc<dyn MessagePublisher> = Arc::new(publisher(&provider));
    let mut uow = UnitOfWork::new(NoopTransaction, shared);
    uow.enqueue(event);
    assert!(uow.commit().await.unwrap().is_complete());

    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store.get(site_id).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(found.is_ok(), "site was not replicated");

    host.shutdown().await.unwrap();
    provider.client().delete_consumer(&group, "site-created").await.unwrap();
}

#[tokio::test]
async fn test_nats_duplicate_booking_one_invoice() {
    let provider = nats_provider!("e2e_invoice");
    let ledger = Arc::new(MemoryInvoiceLedger::new());
    let erp = Arc::new(MemoryErpGateway::new());

    let mut registry = HandlerRegistry::new();
    registry
        .register::<BookingCreatedEvent, _>(InvoiceOnBookingHandler::new(ledger.clone(), erp.clone()))
        .unwrap();
    let group = format!("invoice-{}", Uuid::new_v4().simple());
    let consumer = MessageConsumer::new(
        provider.clone(),
        registry,
        Arc::new(MemoryDlqHandler::default()),
        ConsumerOptions {
            group_id: group.clone(),
            auto_offset_reset: OffsetReset::Latest,
            poll_timeout_ms: 200,
            ..Default::default()
        },
    )
    .unwrap();
    let host = ConsumerHost::start(consumer).await.unwrap();

    let from = chrono::Utc::now();
    let event = BookingCreatedEvent::new(
        Uuid::new_v4(),
        "Lot E",
        "XYZ-987",
        "+966511111111",
        from,
        from + chrono::Duration::hours(2),
        40.0,
    );
    // Two distinct publishes of the same ticket (new event ids, so no broker dedup).
    let publisher = publisher(&provider);
    publisher.publish_event(&event).await.unwrap();
    let replay = BookingCreatedEvent::new(
        event.ticket_id(),
        event.site_name(),
        event.plate_number(),
        event.phone_number(),
        event.booking_from(),
        event.booking_to(),
        event.total_price(),
    );
    publisher.publish_event(&replay).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(ledger.invoices().await.len(), 1);
    assert_eq!(erp.submissions().len(), 1);

    host.shutdown().await.unwrap();
    provider.client().delete_consumer(&group, "booking-created").await.unwrap();
}

#[tokio::test]
async fn test_nats_provider_info() {
    let provider = nats_provider!("info");
    publisher(&provider).publish_event(&site("Lot F")).await.unwrap();

    let info = provider.info().await.unwrap();
    assert_eq!(info.provider, "nats");
    assert!(info.messages >= 1);
}

#[tokio::test]
async fn test_nats_health_check() {
    let provider = nats_provider!("health");
    assert!(provider.health().await.unwrap());
}

#[tokio::test]
async fn test_nats_concurrent_publish() {
    let provider = nats_provider!("concurrent");
    let publisher = Arc::new(publisher(&provider));
    let mut handles = Vec::new();

    for i in 0..20 {
        let publisher = publisher.clone();
        handles.push(tokio::spawn(async move {
            publisher.publish_event(&site(&format!("Lot {}", i))).await
        }));
    }

    let mut sequences = Vec::new();
    for handle in handles {
        sequences.push(handle.await.unwrap().unwrap().sequence);
    }
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), 20);
}
