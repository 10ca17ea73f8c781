//! NATS JetStream broker provider
//!
//! Topics map to subjects under one stream; consumer groups map to durable
//! pull consumers with explicit ack.

mod client;
mod config;
mod subscriber;

pub use client::{NatsClient, StreamInfo};
pub use config::{NatsConfig, StorageType};
pub use subscriber::NatsSubscription;

use crate::config::{Acks, OffsetReset};
use crate::error::Result;
use crate::provider::{BrokerProvider, ProviderInfo, Subscription};
use crate::types::OutgoingMessage;
use async_trait::async_trait;
use std::time::Duration;

/// NATS JetStream broker provider
///
/// Wraps `NatsClient` and implements the `BrokerProvider` trait.
pub struct NatsProvider {
    client: NatsClient,
}

impl NatsProvider {
    /// Connect to NATS and initialize the JetStream stream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl BrokerProvider for NatsProvider {
    async fn send(&self, message: OutgoingMessage, acks: Acks, timeout: Duration) -> Result<u64> {
        self.client.send(message, acks, timeout).await
    }

    async fn subscribe(
        &self,
        group: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>> {
        let sub = self.client.subscribe(group, topic, reset).await?;
        Ok(Box::new(sub))
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let info = self.client.stream_info().await?;
        Ok(ProviderInfo {
            provider: "nats".to_string(),
            messages: info.messages,
            bytes: info.bytes,
            consumers: info.consumer_count,
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}
