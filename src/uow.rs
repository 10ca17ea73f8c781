//! Unit of work: local commit, then publish what was staged
//!
//! Events staged during a unit of work are published only after the local
//! transaction commits, each exactly once. A publish failure after a
//! successful commit is logged and reported but not retried; the staged
//! events live in memory only, so an event whose publish failed is lost.

use crate::error::{EventError, Result};
use crate::event::{IntegrationEvent, StagedEvent};
use crate::publisher::MessagePublisher;
use crate::staging::{EventProducer, StagingQueue};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// The service's local persistence transaction
#[async_trait]
pub trait LocalTransaction: Send {
    /// Make the local writes durable
    async fn commit(&mut self) -> std::result::Result<(), String>;
}

/// Transaction with nothing to write
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransaction;

#[async_trait]
impl LocalTransaction for NoopTransaction {
    async fn commit(&mut self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Outcome of the publish phase of a commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Events the broker acknowledged, in publish order
    pub published: Vec<Uuid>,

    /// Events whose publish failed, with the error text
    pub failed: Vec<(Uuid, String)>,
}

impl CommitReport {
    /// Number of events drained from the staging queue
    pub fn total(&self) -> usize {
        self.published.len() + self.failed.len()
    }

    /// Every drained event was acknowledged
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Coordinates one local transaction with the events it raised
pub struct UnitOfWork<T: LocalTransaction> {
    transaction: T,
    queue: StagingQueue,
    publisher: Arc<dyn MessagePublisher>,
}

impl<T: LocalTransaction> UnitOfWork<T> {
    pub fn new(transaction: T, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self {
            transaction,
            queue: StagingQueue::new(),
            publisher,
        }
    }

    /// Stage an event for publication after commit
    pub fn enqueue<E: IntegrationEvent>(&self, event: E) {
        self.queue.enqueue(event);
    }

    /// Narrow staging view to hand to domain code
    pub fn producer(&self) -> &dyn EventProducer {
        &self.queue
    }

    /// Events currently staged
    pub fn staged(&self) -> usize {
        self.queue.len()
    }

    pub fn transaction(&self) -> &T {
        &self.transaction
    }

    pub fn transaction_mut(&mut self) -> &mut T {
        &mut self.transaction
    }

    /// Drop staged events without publishing (scope abandoned)
    pub fn discard(&self) {
        self.queue.reset();
    }

    /// Commit locally, then publish every staged event once
    ///
    /// A local commit failure returns [`EventError::LocalCommit`] and leaves
    /// the staged events in place. Once the local commit succeeds the queue
    /// is drained, so calling `commit` again never republishes them; publish
    /// failures are reported in the [`CommitReport`] rather than as an error.
    pub async fn commit(&mut self) -> Result<CommitReport> {
        self.transaction
            .commit()
            .await
            .map_err(EventError::LocalCommit)?;

        let events = self.queue.drain_all();
        let mut report = CommitReport::default();

        for event in events {
            self.publish_one(&event, &mut report).await;
        }

        if report.total() > 0 {
            tracing::info!(
                published = report.published.len(),
                failed = report.failed.len(),
                "Unit of work committed"
            );
        }

        Ok(report)
    }

    async fn publish_one(&self, event: &StagedEvent, report: &mut CommitReport) {
        match self.publisher.publish(event).await {
            Ok(receipt) => report.published.push(receipt.event_id),
            Err(e) => {
                tracing::error!(
                    event_id = %event.event_id(),
                    event_type = event.event_type(),
                    topic = %self.publisher.topic_for(event),
                    error = %e,
                    "Failed to publish integration event after local commit"
                );
                report.failed.push((event.event_id(), e.to_string()));
            }
        }
    }
}

impl<T: LocalTransaction> Drop for UnitOfWork<T> {
    fn drop(&mut self) {
        let pending = self.queue.len();
        if pending > 0 {
            tracing::warn!(pending, "Unit of work dropped with staged events; discarding");
            self.queue.reset();
        }
    }
}
