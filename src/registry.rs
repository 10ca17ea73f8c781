//! Handler registry
//!
//! Maps each event type (and the topic it arrives on) to exactly one
//! handler. Built once at startup; a second handler for the same event type
//! is a configuration error.

use crate::codec;
use crate::error::{EventError, Result};
use crate::event::IntegrationEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Applies one integration event to the local service
///
/// Delivery is at-least-once: the same event may arrive more than once and
/// applying it twice must leave the same state as applying it once.
#[async_trait]
pub trait MessageHandler<E: IntegrationEvent>: Send + Sync {
    async fn handle(&self, event: E, cancel: CancellationToken) -> Result<()>;
}

#[async_trait]
impl<E: IntegrationEvent, H: MessageHandler<E> + ?Sized> MessageHandler<E> for Arc<H> {
    async fn handle(&self, event: E, cancel: CancellationToken) -> Result<()> {
        (**self).handle(event, cancel).await
    }
}

/// Handler with the event type erased: decodes bytes, then applies
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn dispatch(&self, payload: &[u8], cancel: CancellationToken) -> Result<()>;
}

struct TypedHandler<E, H> {
    handler: H,
    _event: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, H> ErasedHandler for TypedHandler<E, H>
where
    E: IntegrationEvent,
    H: MessageHandler<E>,
{
    async fn dispatch(&self, payload: &[u8], cancel: CancellationToken) -> Result<()> {
        let event: E = codec::decode(payload)?;
        self.handler.handle(event, cancel).await.map_err(|e| match e {
            EventError::Handler { .. } => e,
            // Only decoding marks a record as poison; anything the handler
            // raises is retryable.
            other => EventError::handler(E::EVENT_TYPE, other),
        })
    }
}

/// Registered handler for one topic
#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) event_type: &'static str,
    pub(crate) handler: Arc<dyn ErasedHandler>,
}

/// Event-type → handler dispatch table
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    routes: HashMap<String, Route>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `E` on its default topic
    pub fn register<E, H>(&mut self, handler: H) -> Result<&mut Self>
    where
        E: IntegrationEvent,
        H: MessageHandler<E> + 'static,
    {
        self.register_on::<E, H>(E::topic(), handler)
    }

    /// Register the handler for `E` on an explicit topic
    pub fn register_on<E, H>(&mut self, topic: impl Into<String>, handler: H) -> Result<&mut Self>
    where
        E: IntegrationEvent,
        H: MessageHandler<E> + 'static,
    {
        let topic = topic.into();
        if self.contains(E::EVENT_TYPE) || self.routes.contains_key(&topic) {
            return Err(EventError::DuplicateHandler {
                event_type: E::EVENT_TYPE.to_string(),
            });
        }

        tracing::debug!(event_type = E::EVENT_TYPE, topic = %topic, "Handler registered");
        self.routes.insert(
            topic,
            Route {
                event_type: E::EVENT_TYPE,
                handler: Arc::new(TypedHandler {
                    handler,
                    _event: PhantomData,
                }),
            },
        );
        Ok(self)
    }

    /// Whether a handler is registered for an event type tag
    pub fn contains(&self, event_type: &str) -> bool {
        self.routes.values().any(|r| r.event_type == event_type)
    }

    /// Event type tag expected on `topic`
    pub fn event_type_for(&self, topic: &str) -> Option<&'static str> {
        self.routes.get(topic).map(|r| r.event_type)
    }

    /// Topics with a registered handler, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Decode `payload` and run the handler registered for `topic`
    pub async fn dispatch(&self, topic: &str, payload: &[u8], cancel: CancellationToken) -> Result<()> {
        let route = self
            .route(topic)
            .ok_or_else(|| EventError::NotFound(format!("no handler for topic '{}'", topic)))?;
        route.handler.dispatch(payload, cancel).await
    }

    pub(crate) fn route(&self, topic: &str) -> Option<&Route> {
        self.routes.get(topic)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for topic in self.topics() {
            map.entry(&topic, &self.routes[&topic].event_type);
        }
        map.finish()
    }
}
