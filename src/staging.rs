//! Per-unit-of-work event staging queue
//!
//! Domain code stages events while it works; the unit of work drains the
//! queue after the local commit succeeds. Nothing here is durable.

use crate::event::{IntegrationEvent, StagedEvent};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// The narrow "stage an event" interface handed to domain services
pub trait EventProducer: Send + Sync {
    /// Append an event to the current unit of work; never fails
    fn stage(&self, event: StagedEvent);
}

/// Typed convenience over [`EventProducer`]
pub trait EventProducerExt: EventProducer {
    /// Stage a concrete event
    fn enqueue<E: IntegrationEvent>(&self, event: E) {
        self.stage(StagedEvent::new(event));
    }
}

impl<P: EventProducer + ?Sized> EventProducerExt for P {}

/// Thread-safe, FIFO staging buffer scoped to one unit of work
#[derive(Debug, Default)]
pub struct StagingQueue {
    events: Mutex<VecDeque<StagedEvent>>,
}

impl StagingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a concrete event
    pub fn enqueue<E: IntegrationEvent>(&self, event: E) {
        self.stage(StagedEvent::new(event));
    }

    /// Atomically take every staged event, oldest first
    pub fn drain_all(&self) -> Vec<StagedEvent> {
        let drained: Vec<StagedEvent> = self.lock().drain(..).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Staged events drained");
        }
        drained
    }

    /// Drop every staged event without returning them
    pub fn reset(&self) {
        let mut events = self.lock();
        if !events.is_empty() {
            tracing::debug!(count = events.len(), "Staged events discarded");
        }
        events.clear();
    }

    /// Number of staged events
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so poisoning is ignored rather than surfaced to producers.
    fn lock(&self) -> MutexGuard<'_, VecDeque<StagedEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventProducer for StagingQueue {
    fn stage(&self, event: StagedEvent) {
        tracing::debug!(
            event_id = %event.event_id(),
            event_type = event.event_type(),
            "Event staged"
        );
        self.lock().push_back(event);
    }
}
