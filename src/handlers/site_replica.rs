//! Booking side: keep a local replica of every created site

use crate::contracts::SiteCreatedEvent;
use crate::error::{EventError, Result};
use crate::event::IntegrationEvent;
use crate::registry::MessageHandler;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Booking's copy of a site
#[derive(Debug, Clone, PartialEq)]
pub struct SiteReplica {
    pub id: Uuid,
    pub name_en: String,
    pub name_ar: String,
    pub path: String,
    pub is_leaf: bool,
    pub price_per_hour: Option<f64>,
    pub integration_code: Option<String>,
    pub number_of_slots: Option<i32>,
}

impl From<&SiteCreatedEvent> for SiteReplica {
    fn from(event: &SiteCreatedEvent) -> Self {
        Self {
            id: event.site_id(),
            name_en: event.name_en().to_string(),
            name_ar: event.name_ar().to_string(),
            path: event.path().to_string(),
            is_leaf: event.is_leaf(),
            price_per_hour: event.price_per_hour(),
            integration_code: event.integration_code().map(str::to_string),
            number_of_slots: event.number_of_slots(),
        }
    }
}

/// Storage for site replicas, keyed by site id
#[async_trait]
pub trait SiteReplicaStore: Send + Sync {
    async fn get(&self, site_id: Uuid) -> Result<Option<SiteReplica>>;

    /// Insert a new replica; fails if the id already exists
    async fn insert(&self, site: SiteReplica) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySiteReplicaStore {
    rows: RwLock<HashMap<Uuid, SiteReplica>>,
}

impl MemorySiteReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SiteReplicaStore for MemorySiteReplicaStore {
    async fn get(&self, site_id: Uuid) -> Result<Option<SiteReplica>> {
        Ok(self.rows.read().await.get(&site_id).cloned())
    }

    async fn insert(&self, site: SiteReplica) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&site.id) {
            return Err(EventError::Store(format!("site {} already exists", site.id)));
        }
        rows.insert(site.id, site);
        Ok(())
    }
}

/// Applies `SiteCreatedEvent` to the local site table
///
/// Insert-if-absent on `site_id`, so a redelivered event is a no-op.
pub struct SiteReplicaHandler<S: ?Sized> {
    store: Arc<S>,
}

impl<S: SiteReplicaStore + ?Sized> SiteReplicaHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: SiteReplicaStore + ?Sized> MessageHandler<SiteCreatedEvent> for SiteReplicaHandler<S> {
    async fn handle(&self, event: SiteCreatedEvent, _cancel: CancellationToken) -> Result<()> {
        if self.store.get(event.site_id()).await?.is_some() {
            tracing::debug!(
                site_id = %event.site_id(),
                event_id = %event.event_id(),
                "Site already replicated"
            );
            return Ok(());
        }

        self.store.insert(SiteReplica::from(&event)).await?;
        tracing::info!(
            site_id = %event.site_id(),
            name_ar = %event.name_ar(),
            is_leaf = event.is_leaf(),
            "Site replicated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replicates_leaf_site() {
        let store = Arc::new(MemorySiteReplicaStore::new());
        let handler = SiteReplicaHandler::new(store.clone());
        let site_id = Uuid::new_v4();
        let event = SiteCreatedEvent::builder(site_id, "Lot B", "موقف ب", "/riyadh/lot-b")
            .leaf(12.5, "RUH-B", 40)
            .build();

        handler.handle(event, CancellationToken::new()).await.unwrap();

        let row = store.get(site_id).await.unwrap().unwrap();
        assert_eq!(row.name_en, "Lot B");
        assert!(row.is_leaf);
        assert_eq!(row.price_per_hour, Some(12.5));
        assert_eq!(row.integration_code.as_deref(), Some("RUH-B"));
        assert_eq!(row.number_of_slots, Some(40));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let store = Arc::new(MemorySiteReplicaStore::new());
        let handler = SiteReplicaHandler::new(store.clone());
        let event = SiteCreatedEvent::builder(Uuid::new_v4(), "Lot A", "موقف أ", "/lot-a").build();

        handler.handle(event.clone(), CancellationToken::new()).await.unwrap();
        handler.handle(event, CancellationToken::new()).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_insert() {
        let store = MemorySiteReplicaStore::new();
        let event = SiteCreatedEvent::builder(Uuid::new_v4(), "Lot A", "موقف أ", "/lot-a").build();
        store.insert(SiteReplica::from(&event)).await.unwrap();
        assert!(matches!(
            store.insert(SiteReplica::from(&event)).await,
            Err(EventError::Store(_))
        ));
    }
}
