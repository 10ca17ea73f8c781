//! NATS JetStream client: connect, send, join consumer groups

use super::config::{NatsConfig, StorageType};
use super::subscriber::NatsSubscription;
use crate::config::{Acks, OffsetReset};
use crate::error::{EventError, Result};
use crate::types::{OutgoingMessage, HEADER_BROKER_MSG_ID};
use async_nats::jetstream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// NATS JetStream client
///
/// Owns the connection and the stream handle. The underlying connection is
/// multiplexed, so concurrent sends do not wait on each other.
pub struct NatsClient {
    client: async_nats::Client,

    jetstream: jetstream::Context,

    /// Stream handle (Mutex for methods requiring &mut self)
    stream: Mutex<jetstream::stream::Stream>,

    config: Arc<NatsConfig>,
}

impl NatsClient {
    /// Connect to NATS and make sure the JetStream stream exists
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| EventError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, client = %config.client_name, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());
        let stream = ensure_stream(&jetstream, &config).await?;

        Ok(Self {
            client,
            jetstream,
            stream: Mutex::new(stream),
            config: Arc::new(config),
        })
    }

    /// Send a message to `<prefix>.<topic>` and wait for the stream ack
    ///
    /// The message key becomes `Nats-Msg-Id`, so a retried send of the same
    /// event inside the server's dedup window is stored once. A message marked
    /// `require_new` fails instead when the server reports it as a duplicate.
    pub async fn send(&self, message: OutgoingMessage, acks: Acks, timeout: Duration) -> Result<u64> {
        let subject = self.config.subject(&message.topic);
        let require_new = message.require_new;
        let topic = message.topic;

        let mut headers = async_nats::HeaderMap::new();
        for (name, value) in &message.headers {
            headers.insert(name.as_str(), value.as_str());
        }
        if let Some(ref key) = message.key {
            headers.insert(HEADER_BROKER_MSG_ID, key.as_str());
        }

        let ack_fut = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, message.payload)
            .await
            .map_err(|e| EventError::Publish {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

        if acks == Acks::None {
            tracing::debug!(topic = %topic, subject = %subject, "Record sent without ack");
            return Ok(0);
        }

        let ack = tokio::time::timeout(timeout, ack_fut)
            .await
            .map_err(|_| {
                EventError::Timeout(format!(
                    "publish ack timed out after {:?} for topic '{}'",
                    timeout, topic
                ))
            })?
            .map_err(|e| EventError::Publish {
                topic: topic.clone(),
                reason: format!("ack failed: {}", e),
            })?;

        if ack.duplicate {
            if require_new {
                return Err(EventError::Publish {
                    topic,
                    reason: format!(
                        "server dropped the message as a duplicate of sequence {}",
                        ack.sequence
                    ),
                });
            }
            tracing::debug!(topic = %topic, sequence = ack.sequence, "Duplicate publish dropped by server");
        }

        tracing::debug!(
            topic = %topic,
            subject = %subject,
            sequence = ack.sequence,
            "Record published"
        );

        Ok(ack.sequence)
    }

    /// Join `group` on `topic` through a durable pull consumer
    pub async fn subscribe(
        &self,
        group: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<NatsSubscription> {
        let consumer_name = NatsConfig::consumer_name(group, topic);
        let config = build_consumer_config(&consumer_name, &self.config.subject(topic), reset, &self.config);

        let consumer = self
            .stream
            .lock()
            .await
            .get_or_create_consumer(&consumer_name, config)
            .await
            .map_err(|e| {
                EventError::Consumer(format!(
                    "Failed to create durable consumer '{}': {}",
                    consumer_name, e
                ))
            })?;

        let messages = consumer.messages().await.map_err(|e| EventError::Subscribe {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            consumer = %consumer_name,
            group,
            topic,
            reset = ?reset,
            "Durable subscription created"
        );

        Ok(NatsSubscription::new(messages, topic.to_string()))
    }

    /// Delete the durable consumer of `group` on `topic`
    pub async fn delete_consumer(&self, group: &str, topic: &str) -> Result<()> {
        let consumer_name = NatsConfig::consumer_name(group, topic);
        self.stream
            .lock()
            .await
            .delete_consumer(&consumer_name)
            .await
            .map_err(|e| {
                EventError::Consumer(format!(
                    "Failed to delete consumer '{}': {}",
                    consumer_name, e
                ))
            })?;

        tracing::info!(consumer = %consumer_name, "Consumer deleted");
        Ok(())
    }

    /// Get stream info
    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self.stream.lock().await;
        let info = stream
            .info()
            .await
            .map_err(|e| EventError::Stream(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        })
    }

    /// Get the underlying NATS client
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the JetStream context
    pub fn jetstream_context(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

/// Summary of stream state
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: usize,
}

/// Durable, explicit-ack pull consumer filtered to one topic's subject
fn build_consumer_config(
    consumer_name: &str,
    filter_subject: &str,
    reset: OffsetReset,
    config: &NatsConfig,
) -> jetstream::consumer::pull::Config {
    let deliver_policy = match reset {
        OffsetReset::Earliest => jetstream::consumer::DeliverPolicy::All,
        OffsetReset::Latest => jetstream::consumer::DeliverPolicy::New,
    };

    jetstream::consumer::pull::Config {
        durable_name: Some(consumer_name.to_string()),
        filter_subject: filter_subject.to_string(),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        deliver_policy,
        ack_wait: Duration::from_secs(config.ack_wait_secs),
        // One record in flight per consumer keeps handling in broker order.
        max_ack_pending: 1,
        ..Default::default()
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .name(config.client_name.as_str())
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Ensure the JetStream stream exists with the correct configuration
async fn ensure_stream(
    js: &jetstream::Context,
    config: &NatsConfig,
) -> Result<jetstream::stream::Stream> {
    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.stream_subjects(),
        storage,
        num_replicas: config.replicas.max(1),
        max_messages: config.max_events,
        max_age: Duration::from_secs(config.max_age_secs),
        max_bytes: config.max_bytes,
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    let stream = js
        .get_or_create_stream(stream_config)
        .await
        .map_err(|e| {
            EventError::Stream(format!(
                "Failed to create/get stream '{}': {}",
                config.stream_name, e
            ))
        })?;

    tracing::info!(
        stream = %config.stream_name,
        subjects = ?config.stream_subjects(),
        replicas = config.replicas,
        "JetStream stream ready"
    );

    Ok(stream)
}
