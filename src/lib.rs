//! # pms-event
//!
//! Integration-event messaging for the parking-management services.
//!
//! ## Overview
//!
//! Site, Booking and Invoice stay eventually consistent by exchanging
//! integration events through a broker. A service stages events while it
//! changes its own data; once the local commit succeeds the staged events are
//! published, each on a topic derived from its type. On the other side one
//! loop per topic hands records to the registered handler and commits the
//! offset only after the handler succeeds.
//!
//! Delivery is at-least-once. Staged events live in memory, so an event whose
//! publish fails after the local commit is lost; handlers must tolerate
//! duplicates.
//!
//! ## Quick Start
//!
//! ```rust
//! use pms_event::provider::memory::MemoryProvider;
//! use pms_event::{BrokerPublisher, NoopTransaction, ProducerOptions, SiteCreatedEvent, UnitOfWork};
//! use std::sync::Arc;
//!
//! # async fn example() -> pms_event::Result<()> {
//! let broker = MemoryProvider::default();
//! let publisher = Arc::new(BrokerPublisher::new(
//!     Arc::new(broker.clone()),
//!     ProducerOptions::default(),
//! )?);
//!
//! let mut uow = UnitOfWork::new(NoopTransaction, publisher);
//! uow.enqueue(
//!     SiteCreatedEvent::builder(uuid::Uuid::new_v4(), "Lot A", "موقف أ", "/lot-a").build(),
//! );
//!
//! let report = uow.commit().await?;
//! assert!(report.is_complete());
//! assert_eq!(broker.records("site-created").len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: in-process broker for tests and single-process use
//! - **nats**: NATS JetStream with durable, explicit-ack consumers
//!
//! ## Architecture
//!
//! - **UnitOfWork**: local commit, then publish staged events once
//! - **BrokerPublisher**: event → topic + JSON → `BrokerProvider::send`
//! - **HandlerRegistry** / **ConsumerHost**: typed dispatch, commit after success
//! - **DlqHandler**: where records go when they cannot be handled

pub mod codec;
pub mod config;
pub mod consumer;
pub mod contracts;
pub mod dlq;
pub mod error;
pub mod event;
pub mod handlers;
pub mod idempotence;
pub mod provider;
pub mod publisher;
pub mod registry;
pub mod resolver;
pub mod staging;
pub mod types;
pub mod uow;

// Re-export core types
pub use codec::{decode, encode, JsonSerializer, MessageSerializer};
pub use config::{Acks, ConsumerOptions, MessagingConfig, OffsetReset, ProducerOptions};
pub use consumer::{ConsumerHost, ConsumerState, MessageConsumer};
pub use contracts::{BookingCreatedEvent, SiteCreatedEvent, SiteCreatedEventBuilder};
pub use dlq::{should_dead_letter, BrokerDlqHandler, DeadLetter, DlqHandler, MemoryDlqHandler};
pub use error::{EventError, Result};
pub use event::{EventHeader, IntegrationEvent, StagedEvent};
pub use idempotence::{Idempotent, MemoryProcessedEventStore, ProcessedEventStore};
pub use provider::{BrokerProvider, PendingRecord, ProviderInfo, Subscription};
pub use publisher::{BrokerPublisher, MessagePublisher, MessagePublisherExt};
pub use registry::{HandlerRegistry, MessageHandler};
pub use resolver::{resolve_topic, DefaultNameResolver, NameResolver};
pub use staging::{EventProducer, EventProducerExt, StagingQueue};
pub use types::{BrokerRecord, OutgoingMessage, PublishReceipt};
pub use uow::{CommitReport, LocalTransaction, NoopTransaction, UnitOfWork};

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryProvider};
pub use provider::nats::{NatsClient, NatsConfig, NatsProvider, NatsSubscription, StorageType};
