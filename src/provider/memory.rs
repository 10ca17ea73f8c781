//! In-memory broker provider
//!
//! A single-partition log per topic with per-group committed offsets.
//! Useful for tests and single-process deployments; nothing survives a
//! restart.
//!
//! Delivery follows the same rules as the durable providers: a group sees one
//! uncommitted record at a time, `ack` advances the committed offset, `nak`
//! or dropping the subscription makes the record deliverable again with a
//! higher delivery count.

use super::{BrokerProvider, PendingRecord, ProviderInfo, Subscription};
use crate::config::{Acks, OffsetReset};
use crate::error::{EventError, Result};
use crate::types::{BrokerRecord, OutgoingMessage};
use async_trait::async_trait;
use futures::FutureExt;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Configuration for the in-memory provider
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Retained records per topic; the oldest are dropped beyond this
    pub max_events_per_topic: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_events_per_topic: 100_000,
        }
    }
}

/// In-memory broker provider
///
/// Cloning yields another handle to the same broker, so tests can keep one
/// handle for inspection while the publisher and consumers own others.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    config: MemoryConfig,
    state: Mutex<BrokerState>,
    notify: Notify,
    unavailable: AtomicBool,
    send_delay_ms: AtomicU64,
    next_subscription: AtomicU64,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
}

#[derive(Default)]
struct TopicLog {
    records: VecDeque<StoredRecord>,
    first_offset: u64,
    groups: HashMap<String, GroupCursor>,
}

impl TopicLog {
    fn next_offset(&self) -> u64 {
        self.first_offset + self.records.len() as u64
    }
}

struct StoredRecord {
    key: Option<String>,
    headers: HashMap<String, String>,
    payload: Bytes,
}

#[derive(Default)]
struct GroupCursor {
    /// Next offset to hand out
    committed: u64,
    /// Offset currently handed out, and to which subscription
    in_flight: Option<(u64, u64)>,
    deliveries: HashMap<u64, u64>,
    members: usize,
}

impl MemoryProvider {
    /// Create a provider with custom configuration
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ..Default::default()
            }),
        }
    }

    /// Simulate a broker outage: sends fail with a connection error
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every send by `delay` before it is acknowledged
    ///
    /// A delay longer than the caller's timeout makes the send time out
    /// without the record being stored.
    pub fn set_send_delay(&self, delay: Duration) {
        self.inner
            .send_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Retained records on a topic, oldest first
    pub fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        let state = self.inner.lock();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };

        log.records
            .iter()
            .enumerate()
            .map(|(i, stored)| BrokerRecord {
                topic: topic.to_string(),
                key: stored.key.clone(),
                headers: stored.headers.clone(),
                payload: stored.payload.clone(),
                sequence: log.first_offset + i as u64 + 1,
                num_delivered: 0,
            })
            .collect()
    }

    /// Next offset `group` will read on `topic`, if the group exists
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<u64> {
        let state = self.inner.lock();
        state
            .topics
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .map(|cursor| cursor.committed)
    }

    /// Names of all topics that have been written or subscribed
    pub fn topics(&self) -> Vec<String> {
        let state = self.inner.lock();
        let mut topics: Vec<String> = state.topics.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn append(&self, message: OutgoingMessage) -> u64 {
        let sequence = {
            let mut state = self.lock();
            let log = state.topics.entry(message.topic).or_default();
            log.records.push_back(StoredRecord {
                key: message.key,
                headers: message.headers,
                payload: message.payload,
            });

            let max = self.config.max_events_per_topic;
            if max > 0 {
                while log.records.len() > max {
                    log.records.pop_front();
                    log.first_offset += 1;
                }
            }
            log.next_offset()
        };

        self.notify.notify_waiters();
        sequence
    }

    fn take_next(self: &Arc<Self>, subscription: u64, group: &str, topic: &str) -> Option<PendingRecord> {
        let mut state = self.lock();
        let log = state.topics.get_mut(topic)?;
        let first_offset = log.first_offset;
        let next_offset = log.next_offset();
        let cursor = log.groups.get_mut(group)?;

        if cursor.in_flight.is_some() {
            return None;
        }

        // Counts for records retention already dropped
        cursor.deliveries.retain(|&o, _| o >= first_offset);

        let offset = cursor.committed.max(first_offset);
        cursor.committed = offset;
        if offset >= next_offset {
            return None;
        }

        let delivered = cursor.deliveries.entry(offset).or_insert(0);
        *delivered += 1;
        let num_delivered = *delivered;
        cursor.in_flight = Some((offset, subscription));

        let stored = &log.records[(offset - first_offset) as usize];
        let record = BrokerRecord {
            topic: topic.to_string(),
            key: stored.key.clone(),
            headers: stored.headers.clone(),
            payload: stored.payload.clone(),
            sequence: offset + 1,
            num_delivered,
        };

        let ack_inner = Arc::clone(self);
        let nak_inner = Arc::clone(self);
        let (ack_group, ack_topic) = (group.to_string(), topic.to_string());
        let (nak_group, nak_topic) = (group.to_string(), topic.to_string());

        Some(PendingRecord::new(
            record,
            move || {
                async move {
                    ack_inner.settle(subscription, &ack_group, &ack_topic, offset, true);
                    Ok(())
                }
                .boxed()
            },
            move || {
                async move {
                    nak_inner.settle(subscription, &nak_group, &nak_topic, offset, false);
                    Ok(())
                }
                .boxed()
            },
        ))
    }

    fn settle(&self, subscription: u64, group: &str, topic: &str, offset: u64, commit: bool) {
        {
            let mut state = self.lock();
            let Some(cursor) = state
                .topics
                .get_mut(topic)
                .and_then(|log| log.groups.get_mut(group))
            else {
                return;
            };

            if cursor.in_flight == Some((offset, subscription)) {
                cursor.in_flight = None;
            }
            if commit {
                cursor.committed = cursor.committed.max(offset + 1);
                cursor.deliveries.remove(&offset);
            }
        }
        self.notify.notify_waiters();
    }

    fn leave(&self, subscription: u64, group: &str, topic: &str) {
        {
            let mut state = self.lock();
            if let Some(cursor) = state
                .topics
                .get_mut(topic)
                .and_then(|log| log.groups.get_mut(group))
            {
                if matches!(cursor.in_flight, Some((_, owner)) if owner == subscription) {
                    cursor.in_flight = None;
                }
                cursor.members = cursor.members.saturating_sub(1);
            }
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl BrokerProvider for MemoryProvider {
    async fn send(&self, message: OutgoingMessage, _acks: Acks, timeout: Duration) -> Result<u64> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(EventError::Connection(format!(
                "memory broker unavailable (topic '{}')",
                message.topic
            )));
        }

        let topic = message.topic.clone();
        let delay = Duration::from_millis(self.inner.send_delay_ms.load(Ordering::SeqCst));
        let inner = Arc::clone(&self.inner);

        let sequence = tokio::time::timeout(timeout, async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.append(message)
        })
        .await
        .map_err(|_| {
            EventError::Timeout(format!(
                "send to '{}' not acknowledged within {:?}",
                topic, timeout
            ))
        })?;

        tracing::debug!(topic = %topic, sequence, "Record appended");
        Ok(sequence)
    }

    async fn subscribe(
        &self,
        group: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>> {
        {
            let mut state = self.inner.lock();
            let log = state.topics.entry(topic.to_string()).or_default();
            let start = match reset {
                OffsetReset::Earliest => log.first_offset,
                OffsetReset::Latest => log.next_offset(),
            };
            let cursor = log.groups.entry(group.to_string()).or_insert_with(|| GroupCursor {
                committed: start,
                ..Default::default()
            });
            cursor.members += 1;
        }

        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(group, topic, subscription = id, "Memory subscription created");

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            id,
            group: group.to_string(),
            topic: topic.to_string(),
        }))
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let state = self.inner.lock();
        let mut info = ProviderInfo {
            provider: "memory".to_string(),
            messages: 0,
            bytes: 0,
            consumers: 0,
        };
        for log in state.topics.values() {
            info.messages += log.records.len() as u64;
            info.bytes += log.records.iter().map(|r| r.payload.len() as u64).sum::<u64>();
            info.consumers += log.groups.values().map(|g| g.members).sum::<usize>();
        }
        Ok(info)
    }

    fn name(&self) -> &str {
        "memory"
    }

    async fn health(&self) -> Result<bool> {
        Ok(!self.inner.unavailable.load(Ordering::SeqCst))
    }
}

/// Subscription handle for the in-memory provider
pub struct MemorySubscription {
    inner: Arc<Inner>,
    id: u64,
    group: String,
    topic: String,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<PendingRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wake-ups before checking, so a send landing in
            // between is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(pending) = self.inner.take_next(self.id, &self.group, &self.topic) {
                return Ok(Some(pending));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.inner.leave(self.id, &self.group, &self.topic);
    }
}
