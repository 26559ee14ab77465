//! Catalog change publishing and cross-instance cache convergence.
//!
//! Every mutation publishes a `CatalogEvent`. Each instance runs a
//! `CatalogSync` handler that reloads its resource and permission caches when
//! another instance changes the catalog.

use async_trait::async_trait;
use gatehouse_events::{
    CatalogEvent, Event, EventBus, EventBusResult, EventCategory, EventHandler,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::PermissionCatalog;
use crate::registry::ResourceRegistry;

/// Topic patterns that invalidate the cached catalogs.
pub const CATALOG_TOPICS: [&str; 2] = ["gatehouse.resource.#", "gatehouse.permission.#"];

/// Publishes catalog events on behalf of one instance.
///
/// Without a bus, publishing is a no-op. Bus failures are logged and never
/// surface to the caller.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Option<Arc<dyn EventBus>>,
    instance_id: String,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("instance_id", &self.instance_id)
            .field("enabled", &self.bus.is_some())
            .finish()
    }
}

impl EventPublisher {
    /// Create a publisher for an instance.
    pub fn new(bus: Option<Arc<dyn EventBus>>, instance_id: impl Into<String>) -> Self {
        Self {
            bus,
            instance_id: instance_id.into(),
        }
    }

    /// A publisher that drops every event.
    pub fn disabled() -> Self {
        Self::new(None, "local")
    }

    /// The instance id stamped on published events.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Publish an event.
    pub async fn publish(&self, event: CatalogEvent) {
        let Some(ref bus) = self.bus else {
            return;
        };

        let envelope = event.to_event(&self.instance_id);
        let topic = envelope.topic();
        match bus.publish(envelope).await {
            Ok(()) => debug!(topic = %topic, "Published catalog event"),
            Err(e) => warn!(topic = %topic, error = %e, "Failed to publish catalog event"),
        }
    }
}

/// Reloads the local catalog caches when another instance changes them.
pub struct CatalogSync {
    instance_id: String,
    registry: Arc<ResourceRegistry>,
    catalog: Arc<PermissionCatalog>,
}

impl CatalogSync {
    /// Create a sync handler for this instance.
    pub fn new(
        instance_id: impl Into<String>,
        registry: Arc<ResourceRegistry>,
        catalog: Arc<PermissionCatalog>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            registry,
            catalog,
        }
    }

    /// Register this handler on a bus.
    pub async fn attach(self, bus: &dyn EventBus) -> EventBusResult<()> {
        bus.register_handler(Arc::new(self)).await
    }

    /// Apply one event. Returns whether a reload happened.
    pub async fn apply(&self, event: &Event) -> bool {
        if event.source == self.instance_id {
            return false;
        }

        let category = match EventCategory::from_event_type(&event.event_type) {
            Some(c) if c.affects_catalog() => c,
            _ => return false,
        };

        // Resource changes cascade into permissions, so both caches reload
        if category == EventCategory::Resource {
            if let Err(e) = self.registry.reload().await {
                warn!(error = %e, "Failed to reload resources after remote change");
            }
        }
        match self.catalog.reload().await {
            Ok(count) => info!(
                event_type = %event.event_type,
                source = %event.source,
                permissions = count,
                "Reloaded catalog after remote change"
            ),
            Err(e) => warn!(error = %e, "Failed to reload permissions after remote change"),
        }
        true
    }
}

#[async_trait]
impl EventHandler for CatalogSync {
    async fn handle(&self, event: Event) -> EventBusResult<()> {
        self.apply(&event).await;
        Ok(())
    }

    fn topics(&self) -> Vec<String> {
        CATALOG_TOPICS.iter().map(|t| t.to_string()).collect()
    }
}
