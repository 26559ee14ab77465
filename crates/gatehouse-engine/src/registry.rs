//! Resource registry.
//!
//! Defines named resources and their allowed actions. Creating a resource
//! creates one permission per action; changing its actions regenerates them
//! and deleting it removes them.

use gatehouse_events::CatalogEvent;
use gatehouse_model::{
    AuthzError, AuthzResult, NewResource, Resource, ResourcePatch, SystemResource,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::PermissionCatalog;
use crate::index::CatalogIndex;
use crate::store::CatalogStore;
use crate::sync::EventPublisher;

/// Registry of resources.
pub struct ResourceRegistry {
    store: Arc<dyn CatalogStore>,
    catalog: Arc<PermissionCatalog>,
    cache: RwLock<CatalogIndex<Resource>>,
    events: EventPublisher,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        catalog: Arc<PermissionCatalog>,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            catalog,
            cache: RwLock::new(CatalogIndex::new()),
            events,
        }
    }

    /// Register a resource and generate its permissions.
    ///
    /// Permissions that already exist are left alone.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: NewResource) -> AuthzResult<Resource> {
        let resource = Resource::new(request)?;
        if self.cache.read().await.contains_name(&resource.name) {
            return Err(AuthzError::Conflict(format!(
                "resource '{}' already exists",
                resource.name
            )));
        }

        let stored = self.store.create_resource(&resource).await?;
        self.cache.write().await.insert(stored.clone())?;

        let generated = self
            .catalog
            .ensure_permissions(stored.generated_permissions())
            .await?;

        info!(
            resource_id = %stored.id,
            permissions = generated.len(),
            "Resource created"
        );
        self.events
            .publish(CatalogEvent::ResourceCreated {
                resource_id: stored.id,
                name: stored.name.clone(),
                generated_permissions: generated,
            })
            .await;
        Ok(stored)
    }

    /// Update a custom resource.
    ///
    /// When the generated permission names change, the old ones are deleted
    /// and the new ones created.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: ResourcePatch) -> AuthzResult<Resource> {
        let current = self.get(id).await?;
        if current.is_system {
            return Err(AuthzError::InvalidArgument(format!(
                "system resource '{}' cannot be modified",
                current.name
            )));
        }

        let mut next = current.clone();
        let regenerate = next.apply(patch)?;

        let stored = match self.store.update_resource(&next).await {
            Ok(stored) => stored,
            Err(e @ AuthzError::VersionConflict { .. }) => {
                self.refresh(&current.name).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.cache.write().await.upsert(stored.clone());

        if regenerate {
            let previous: Vec<String> = current
                .permission_names()
                .iter()
                .map(ToString::to_string)
                .collect();
            let removed = self.catalog.remove_permissions(&previous).await?;
            let created = self
                .catalog
                .ensure_permissions(stored.generated_permissions())
                .await?;
            debug!(
                removed = removed.len(),
                created = created.len(),
                "Regenerated resource permissions"
            );
        }

        info!(name = %stored.name, version = stored.version, "Resource updated");
        self.events
            .publish(CatalogEvent::ResourceUpdated {
                resource_id: stored.id,
                name: stored.name.clone(),
                regenerated: regenerate,
            })
            .await;
        Ok(stored)
    }

    /// Delete a custom resource and every permission of that resource.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> AuthzResult<()> {
        let current = self.get(id).await?;
        if current.is_system {
            return Err(AuthzError::InvalidArgument(format!(
                "system resource '{}' cannot be deleted",
                current.name
            )));
        }

        let removed = self.catalog.remove_by_resource(&current.name).await?;
        self.store.delete_resource(id).await?;
        self.cache.write().await.remove(&id);

        info!(name = %current.name, permissions = removed.len(), "Resource deleted");
        self.events
            .publish(CatalogEvent::ResourceDeleted {
                resource_id: id,
                name: current.name,
                removed_permissions: removed,
            })
            .await;
        Ok(())
    }

    /// Case-insensitive substring search over name, description, category
    /// and actions.
    pub async fn search(&self, query: &str) -> Vec<Resource> {
        let mut hits: Vec<Resource> = self
            .cache
            .read()
            .await
            .values()
            .filter(|r| r.matches_query(query))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits
    }

    /// Fetch by id.
    pub async fn get(&self, id: Uuid) -> AuthzResult<Resource> {
        self.cache
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AuthzError::NotFound(format!("resource {}", id)))
    }

    /// Fetch by name.
    pub async fn find_by_name(&self, name: &str) -> Option<Resource> {
        self.cache.read().await.get_by_name(name).cloned()
    }

    /// All resources, sorted by name.
    pub async fn list(&self) -> Vec<Resource> {
        self.cache.read().await.sorted()
    }

    /// Replace the cache with the store's content.
    pub async fn reload(&self) -> AuthzResult<usize> {
        let all = self.store.find_all_resources().await?;
        let count = all.len();
        self.cache.write().await.replace_all(all);
        debug!(count, "Resource cache loaded");
        Ok(count)
    }

    /// Seed the system resources that are not persisted yet, then load every
    /// persisted resource. Returns how many were created.
    #[instrument(skip(self))]
    pub async fn seed_system_resources(&self) -> AuthzResult<usize> {
        let mut created = 0;
        for system in SystemResource::all() {
            if self
                .store
                .find_resource_by_name(system.as_str())
                .await?
                .is_some()
            {
                continue;
            }
            self.store.create_resource(&system.to_resource()?).await?;
            created += 1;
        }

        self.reload().await?;
        info!(created, "System resources seeded");
        Ok(created)
    }

    async fn refresh(&self, name: &str) {
        match self.store.find_resource_by_name(name).await {
            Ok(Some(fresh)) => self.cache.write().await.upsert(fresh),
            Ok(None) => {
                self.cache.write().await.remove_by_name(name);
            }
            Err(e) => warn!(name = %name, error = %e, "Failed to refresh cached resource"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentityProvider;
    use crate::store::MemoryCatalogStore;

    struct Fixture {
        store: Arc<MemoryCatalogStore>,
        catalog: Arc<PermissionCatalog>,
        registry: ResourceRegistry,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryCatalogStore::new());
        let catalog = Arc::new(PermissionCatalog::new(
            store.clone(),
            Arc::new(MemoryIdentityProvider::new()),
            EventPublisher::disabled(),
        ));
        let registry = ResourceRegistry::new(store.clone(), catalog.clone(), EventPublisher::disabled());
        Fixture {
            store,
            catalog,
            registry,
        }
    }

    fn names(permissions: Vec<gatehouse_model::Permission>) -> Vec<String> {
        permissions.into_iter().map(|p| p.name).collect()
    }

    #[tokio::test]
    async fn test_create_generates_one_permission_per_action() {
        let f = fixture();
        f.registry
            .create(NewResource::new("invoices", "Invoices", ["read", "approve", "void"]))
            .await
            .unwrap();

        assert_eq!(
            names(f.catalog.list_by_resource("invoices").await),
            vec!["invoices:approve", "invoices:read", "invoices:void"]
        );
    }

    #[tokio::test]
    async fn test_create_with_scope_and_existing_permission() {
        let f = fixture();
        f.catalog
            .ensure_permissions(vec![gatehouse_model::Permission::new(
                &gatehouse_model::PermissionName::parse("notes:read:own").unwrap(),
                "pre-existing",
            )])
            .await
            .unwrap();

        f.registry
            .create(NewResource::new("notes", "Notes", ["read", "write"]).with_default_scope("own"))
            .await
            .unwrap();

        let perms = f.catalog.list_by_resource("notes").await;
        assert_eq!(names(perms.clone()), vec!["notes:read:own", "notes:write:own"]);
        assert_eq!(perms[0].description, "pre-existing");
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = fixture();
        let empty: [&str; 0] = [];
        for bad in [
            NewResource::new("invoices", "x", empty),
            NewResource::new("invoices", "x", ["read", "read"]),
            NewResource::new("invoices", "x", ["Read"]),
            NewResource::new("Invoices", "x", ["read"]),
        ] {
            assert!(matches!(
                f.registry.create(bad).await,
                Err(AuthzError::InvalidArgument(_))
            ));
        }

        f.registry
            .create(NewResource::new("invoices", "x", ["read"]))
            .await
            .unwrap();
        assert!(matches!(
            f.registry
                .create(NewResource::new("invoices", "x", ["write"]))
                .await,
            Err(AuthzError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_update_regenerates_permissions() {
        let f = fixture();
        let r = f
            .registry
            .create(NewResource::new("invoices", "Invoices", ["read", "approve"]))
            .await
            .unwrap();

        let updated = f
            .registry
            .update(
                r.id,
                ResourcePatch {
                    actions: Some(vec!["read".into(), "void".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(
            names(f.catalog.list_by_resource("invoices").await),
            vec!["invoices:read", "invoices:void"]
        );

        f.registry
            .update(
                r.id,
                ResourcePatch {
                    default_scope: Some(Some("team".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            names(f.catalog.list_by_resource("invoices").await),
            vec!["invoices:read:team", "invoices:void:team"]
        );
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let f = fixture();
        let r = f
            .registry
            .create(NewResource::new("invoices", "Invoices", ["read", "approve"]))
            .await
            .unwrap();

        f.registry.delete(r.id).await.unwrap();
        assert!(f.catalog.list_by_resource("invoices").await.is_empty());
        assert!(f.registry.find_by_name("invoices").await.is_none());
        assert!(f.store.find_resource_by_name("invoices").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_system_resources_are_protected() {
        let f = fixture();
        assert_eq!(f.registry.seed_system_resources().await.unwrap(), 6);
        f.catalog.seed_system_permissions().await.unwrap();
        let before = f.catalog.list().await.len();

        let users = f.registry.find_by_name("users").await.unwrap();
        assert!(matches!(
            f.registry.delete(users.id).await,
            Err(AuthzError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.registry.update(users.id, ResourcePatch::default()).await,
            Err(AuthzError::InvalidArgument(_))
        ));
        assert_eq!(f.catalog.list().await.len(), before);
    }

    #[tokio::test]
    async fn test_seeding_twice_creates_nothing_new() {
        let f = fixture();
        assert_eq!(f.registry.seed_system_resources().await.unwrap(), 6);
        assert_eq!(f.registry.seed_system_resources().await.unwrap(), 0);
        assert_eq!(f.registry.list().await.len(), 6);
    }

    #[tokio::test]
    async fn test_stale_update_refreshes_cache() {
        let f = fixture();
        let r = f
            .registry
            .create(NewResource::new("invoices", "Invoices", ["read"]))
            .await
            .unwrap();

        // Another instance wins the race
        let mut remote = r.clone();
        remote.description = "Remote edit".into();
        f.store.update_resource(&remote).await.unwrap();

        let err = f
            .registry
            .update(
                r.id,
                ResourcePatch {
                    description: Some("Local edit".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::VersionConflict { .. }));
        assert_eq!(f.registry.get(r.id).await.unwrap().description, "Remote edit");

        let retried = f
            .registry
            .update(
                r.id,
                ResourcePatch {
                    description: Some("Local edit".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(retried.version, 2);
    }

    #[tokio::test]
    async fn test_search() {
        let f = fixture();
        f.registry
            .create(
                NewResource::new("invoices", "Customer billing", ["approve"])
                    .with_category("finance"),
            )
            .await
            .unwrap();
        f.registry
            .create(NewResource::new("tickets", "Support", ["close"]))
            .await
            .unwrap();

        assert_eq!(f.registry.search("BILLING").await.len(), 1);
        assert_eq!(f.registry.search("finance").await.len(), 1);
        assert_eq!(f.registry.search("clo").await[0].name, "tickets");
        assert!(f.registry.search("nothing").await.is_empty());
    }
}
