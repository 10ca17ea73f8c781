//! NATS JetStream subscription: pulls records from a durable consumer

use crate::error::{EventError, Result};
use crate::provider::{PendingRecord, Subscription};
use crate::types::{
    BrokerRecord, HEADER_BROKER_MSG_ID, HEADER_DEAD_LETTER_ATTEMPTS, HEADER_DEAD_LETTER_REASON,
    HEADER_EVENT_ID, HEADER_EVENT_TYPE,
};
use async_nats::jetstream;
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use futures::FutureExt;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const FORWARDED_HEADERS: [&str; 5] = [
    HEADER_EVENT_TYPE,
    HEADER_EVENT_ID,
    HEADER_DEAD_LETTER_REASON,
    HEADER_DEAD_LETTER_ATTEMPTS,
    HEADER_BROKER_MSG_ID,
];

/// Pull subscription on one durable consumer
pub struct NatsSubscription {
    messages: jetstream::consumer::pull::Stream,
    topic: String,
}

impl NatsSubscription {
    pub(crate) fn new(messages: jetstream::consumer::pull::Stream, topic: String) -> Self {
        Self { messages, topic }
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<PendingRecord>> {
        let msg = match tokio::time::timeout(timeout, self.messages.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => {
                return Err(EventError::Subscribe {
                    topic: self.topic.clone(),
                    reason: "message stream closed".to_string(),
                })
            }
            Ok(Some(Err(e))) => {
                return Err(EventError::Subscribe {
                    topic: self.topic.clone(),
                    reason: e.to_string(),
                })
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let (sequence, num_delivered) = match msg.info() {
            Ok(info) => (info.stream_sequence, info.delivered.max(1) as u64),
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "Missing JetStream metadata");
                (0, 1)
            }
        };

        let mut headers = HashMap::new();
        if let Some(ref map) = msg.headers {
            for name in FORWARDED_HEADERS {
                if let Some(value) = map.get(name) {
                    headers.insert(name.to_string(), value.as_str().to_string());
                }
            }
        }

        let record = BrokerRecord {
            topic: self.topic.clone(),
            key: headers.get(HEADER_BROKER_MSG_ID).cloned(),
            headers,
            payload: msg.payload.clone(),
            sequence,
            num_delivered,
        };

        let msg = Arc::new(msg);
        let ack_msg = Arc::clone(&msg);
        let nak_msg = msg;

        Ok(Some(PendingRecord::new(
            record,
            move || {
                async move {
                    ack_msg
                        .ack()
                        .await
                        .map_err(|e| EventError::Ack(format!("ack failed: {}", e)))
                }
                .boxed()
            },
            move || {
                async move {
                    nak_msg
                        .ack_with(AckKind::Nak(None))
                        .await
                        .map_err(|e| EventError::Ack(format!("nak failed: {}", e)))
                }
                .boxed()
            },
        )))
    }
}
