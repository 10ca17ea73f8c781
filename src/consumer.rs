//! Message consumer
//!
//! One loop per subscribed topic: poll, dispatch to the registered handler,
//! then commit. A record's offset is committed only after its handler
//! succeeds or after it has been dead-lettered; anything else leaves it for
//! redelivery.
//!
//! ```text
//! Idle ─► Polling ─► Dispatching ─► CommittingOffset ─┐
//!            ▲                                        │
//!            └────────────────────────────────────────┘
//! Idle/Polling ─► Stopped   (shutdown)
//! ```

use crate::config::ConsumerOptions;
use crate::dlq::{should_dead_letter, DeadLetter, DlqHandler};
use crate::error::{EventError, Result};
use crate::provider::{BrokerProvider, PendingRecord, Subscription};
use crate::registry::HandlerRegistry;
use crate::types::BrokerRecord;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of one topic loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerState {
    Idle,
    Polling,
    Dispatching,
    CommittingOffset,
    Stopped,
}

enum Outcome {
    Handled,
    /// Handler failed or timed out; retry unless deliveries are used up
    Failed(EventError),
    /// Never processable; park it and move on
    Reject {
        event_type: Option<String>,
        reason: String,
    },
}

/// Runs topic loops for one consumer group
pub struct MessageConsumer {
    provider: Arc<dyn BrokerProvider>,
    registry: Arc<HandlerRegistry>,
    dlq: Arc<dyn DlqHandler>,
    options: ConsumerOptions,
    /// Parent of every handler token. Separate from the loop token: stopping
    /// the loops lets in-flight handlers run to completion.
    handlers: CancellationToken,
}

impl MessageConsumer {
    /// Fails with `EventError::Config` on auto-commit, an empty group or a
    /// zero timeout or delivery limit.
    pub fn new(
        provider: Arc<dyn BrokerProvider>,
        registry: HandlerRegistry,
        dlq: Arc<dyn DlqHandler>,
        options: ConsumerOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            provider,
            registry: Arc::new(registry),
            dlq,
            options,
            handlers: CancellationToken::new(),
        })
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Cancel the token of every running handler
    ///
    /// Stopping the loops does not do this; it is reserved for handlers that
    /// must be abandoned.
    pub fn cancel_handlers(&self) {
        self.handlers.cancel();
    }

    /// Join the group on `topic` and run its loop until `cancel` fires
    ///
    /// `cancel` stops polling only; a record already being handled is
    /// finished and settled first.
    pub async fn run_topic(
        &self,
        topic: &str,
        cancel: CancellationToken,
        state: watch::Sender<ConsumerState>,
    ) -> Result<()> {
        let subscription = match self.subscribe(topic).await {
            Ok(sub) => sub,
            Err(e) => {
                state.send_replace(ConsumerState::Stopped);
                return Err(e);
            }
        };
        self.consume(topic, subscription, cancel, state).await;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        self.provider
            .subscribe(&self.options.group_id, topic, self.options.auto_offset_reset)
            .await
    }

    async fn consume(
        &self,
        topic: &str,
        mut subscription: Box<dyn Subscription>,
        cancel: CancellationToken,
        state: watch::Sender<ConsumerState>,
    ) {
        let group = self.options.group_id.as_str();
        tracing::info!(group, topic, provider = self.provider.name(), "Consumer started");

        loop {
            state.send_replace(ConsumerState::Polling);

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = subscription.poll(self.options.poll_timeout()) => polled,
            };

            let pending = match polled {
                Ok(Some(pending)) => pending,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(group, topic, error = %e, "Poll failed; backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.options.poll_timeout()) => continue,
                    }
                }
            };

            state.send_replace(ConsumerState::Dispatching);
            let outcome = self.dispatch(topic, &pending.record).await;
            self.settle(topic, pending, outcome, &state).await;
        }

        state.send_replace(ConsumerState::Stopped);
        tracing::info!(group, topic, "Consumer stopped");
    }

    async fn dispatch(&self, topic: &str, record: &BrokerRecord) -> Outcome {
        let Some(route) = self.registry.route(topic) else {
            return Outcome::Reject {
                event_type: record.event_type().map(str::to_string),
                reason: format!("no handler registered for topic '{}'", topic),
            };
        };

        if let Some(tag) = record.event_type() {
            if tag != route.event_type {
                return Outcome::Reject {
                    event_type: Some(tag.to_string()),
                    reason: format!(
                        "unexpected event type '{}' on topic '{}' (expected '{}')",
                        tag, topic, route.event_type
                    ),
                };
            }
        }

        tracing::debug!(
            topic,
            event_type = route.event_type,
            event_id = ?record.event_id(),
            sequence = record.sequence,
            num_delivered = record.num_delivered,
            "Dispatching record"
        );

        let token = self.handlers.child_token();
        let timeout = self.options.handler_timeout();
        match tokio::time::timeout(timeout, route.handler.dispatch(&record.payload, token.clone())).await {
            Ok(Ok(())) => Outcome::Handled,
            Ok(Err(e)) if e.is_poison() => Outcome::Reject {
                event_type: Some(route.event_type.to_string()),
                reason: e.to_string(),
            },
            Ok(Err(e)) => Outcome::Failed(e),
            Err(_) => {
                token.cancel();
                Outcome::Failed(EventError::Timeout(format!(
                    "handler for '{}' exceeded {:?}",
                    route.event_type, timeout
                )))
            }
        }
    }

    async fn settle(
        &self,
        topic: &str,
        pending: PendingRecord,
        outcome: Outcome,
        state: &watch::Sender<ConsumerState>,
    ) {
        match outcome {
            Outcome::Handled => {
                state.send_replace(ConsumerState::CommittingOffset);
                commit(topic, pending).await;
            }
            Outcome::Failed(e) if should_dead_letter(&pending.record, self.options.max_deliveries) => {
                let reason = format!(
                    "gave up after {} deliveries: {}",
                    pending.record.num_delivered, e
                );
                let event_type = self.registry.event_type_for(topic).map(str::to_string);
                self.dead_letter(topic, pending, event_type, reason, state).await;
            }
            Outcome::Failed(e) => {
                tracing::warn!(
                    topic,
                    event_id = ?pending.record.event_id(),
                    num_delivered = pending.record.num_delivered,
                    max_deliveries = self.options.max_deliveries,
                    error = %e,
                    "Handler failed; record will be redelivered"
                );
                if let Err(e) = pending.nak().await {
                    tracing::warn!(topic, error = %e, "Failed to nak record");
                }
            }
            Outcome::Reject { event_type, reason } => {
                self.dead_letter(topic, pending, event_type, reason, state).await;
            }
        }
    }

    async fn dead_letter(
        &self,
        topic: &str,
        pending: PendingRecord,
        event_type: Option<String>,
        reason: String,
        state: &watch::Sender<ConsumerState>,
    ) {
        let dead_letter = DeadLetter::new(pending.record.clone(), event_type, reason);
        match self.dlq.handle(dead_letter).await {
            Ok(()) => {
                state.send_replace(ConsumerState::CommittingOffset);
                commit(topic, pending).await;
            }
            Err(e) => {
                tracing::error!(
                    topic,
                    sequence = pending.record.sequence,
                    error = %e,
                    "Dead-letter handler failed; leaving record uncommitted"
                );
                if let Err(e) = pending.nak().await {
                    tracing::warn!(topic, error = %e, "Failed to nak record");
                }
            }
        }
    }
}

async fn commit(topic: &str, pending: PendingRecord) {
    let sequence = pending.record.sequence;
    match pending.ack().await {
        Ok(()) => tracing::debug!(topic, sequence, "Offset committed"),
        Err(e) => tracing::warn!(topic, sequence, error = %e, "Offset commit failed; record may be redelivered"),
    }
}

/// Background consumer: one task per topic, shut down together
pub struct ConsumerHost {
    cancel: CancellationToken,
    handlers: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    states: HashMap<String, watch::Receiver<ConsumerState>>,
    shutdown_timeout: Duration,
}

impl ConsumerHost {
    /// Subscribe to every topic in the consumer's registry and start the loops
    pub async fn start(consumer: MessageConsumer) -> Result<Self> {
        let topics = consumer.registry.topics();
        Self::start_topics(consumer, topics).await
    }

    /// Start loops for an explicit topic list
    ///
    /// Records on a topic without a registered handler are dead-lettered.
    /// All subscriptions are created before any loop starts, so a
    /// subscription failure leaves nothing running.
    pub async fn start_topics(
        consumer: MessageConsumer,
        topics: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let mut subscriptions = Vec::new();
        for topic in topics {
            let subscription = consumer.subscribe(&topic).await?;
            subscriptions.push((topic, subscription));
        }

        let consumer = Arc::new(consumer);
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(subscriptions.len());
        let mut states = HashMap::with_capacity(subscriptions.len());

        for (topic, subscription) in subscriptions {
            let (tx, rx) = watch::channel(ConsumerState::Idle);
            states.insert(topic.clone(), rx);

            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            let task_topic = topic.clone();
            let handle = tokio::spawn(async move {
                consumer.consume(&task_topic, subscription, cancel, tx).await;
            });
            tasks.push((topic, handle));
        }

        tracing::info!(
            group = %consumer.options.group_id,
            topics = tasks.len(),
            "Consumer host started"
        );

        Ok(Self {
            cancel,
            handlers: consumer.handlers.clone(),
            tasks,
            states,
            shutdown_timeout: consumer.options.shutdown_timeout(),
        })
    }

    /// State receivers for every topic loop
    pub fn states(&self) -> HashMap<String, watch::Receiver<ConsumerState>> {
        self.states.clone()
    }

    /// Current state of one topic loop
    pub fn state(&self, topic: &str) -> Option<ConsumerState> {
        self.states.get(topic).map(|rx| *rx.borrow())
    }

    /// Token cancelled when shutdown begins
    ///
    /// Handlers do not see this token; theirs is cancelled only on handler
    /// timeout or once the shutdown deadline has passed.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling, let in-flight handlers finish, then join the loops
    ///
    /// Loops still running after the shutdown timeout have their handler
    /// cancelled, are aborted and reported as [`EventError::Timeout`]; their
    /// records stay uncommitted.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut aborted = Vec::new();

        for (topic, mut handle) in std::mem::take(&mut self.tasks) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(topic = %topic, error = %e, "Consumer task panicked"),
                Err(_) => {
                    self.handlers.cancel();
                    handle.abort();
                    tracing::warn!(topic = %topic, "Consumer did not stop in time; aborted");
                    aborted.push(topic);
                }
            }
        }

        if aborted.is_empty() {
            tracing::info!("Consumer host stopped");
            Ok(())
        } else {
            Err(EventError::Timeout(format!(
                "consumers aborted after {:?}: {}",
                self.shutdown_timeout,
                aborted.join(", ")
            )))
        }
    }
}

impl Drop for ConsumerHost {
    fn drop(&mut self) {
        self.cancel.cancel();
        if !self.tasks.is_empty() {
            // Dropped without shutdown: nothing waits for in-flight handlers.
            self.handlers.cancel();
        }
    }
}
