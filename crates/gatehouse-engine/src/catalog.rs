//! Permission catalog.
//!
//! The canonical list of `resource:action[:scope]` permissions, cached in
//! memory and persisted through a `CatalogStore`. System permissions are
//! seeded at startup and cannot be changed or deleted. Custom permissions
//! cannot be deleted while any role still lists them.

use gatehouse_events::CatalogEvent;
use gatehouse_model::{
    AuthzError, AuthzResult, NewPermission, Permission, PermissionPatch, RoleAttributes,
    SystemResource,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::identity::IdentityProvider;
use crate::index::CatalogIndex;
use crate::store::CatalogStore;
use crate::sync::EventPublisher;

/// Result of seeding the system permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// Seeded through the store; `created` entries were missing.
    Persisted {
        /// Permissions created by this run.
        created: usize,
    },
    /// The store failed; the system permissions are cached in memory only.
    InMemoryOnly {
        /// Permissions added to the cache.
        seeded: usize,
    },
}

/// Catalog of permissions.
pub struct PermissionCatalog {
    store: Arc<dyn CatalogStore>,
    identity: Arc<dyn IdentityProvider>,
    cache: RwLock<CatalogIndex<Permission>>,
    events: EventPublisher,
}

impl PermissionCatalog {
    /// Create an empty catalog. Call `seed_system_permissions` or `reload`
    /// to populate it.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        identity: Arc<dyn IdentityProvider>,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            identity,
            cache: RwLock::new(CatalogIndex::new()),
            events,
        }
    }

    /// Create a custom permission.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: NewPermission) -> AuthzResult<Permission> {
        let name = request.validate()?;
        if self.exists(&request.name).await {
            return Err(AuthzError::Conflict(format!(
                "permission '{}' already exists",
                request.name
            )));
        }

        let permission = request.into_permission(&name);
        let stored = self.store.create_permission(&permission).await?;
        self.cache.write().await.insert(stored.clone())?;

        info!(permission_id = %stored.id, "Permission created");
        self.events
            .publish(CatalogEvent::PermissionCreated {
                permission_id: stored.id,
                name: stored.name.clone(),
            })
            .await;
        Ok(stored)
    }

    /// Update the description, scope or category of a custom permission.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: PermissionPatch) -> AuthzResult<Permission> {
        let current = self.get(id).await?;
        if current.is_system {
            return Err(AuthzError::InvalidArgument(format!(
                "system permission '{}' cannot be modified",
                current.name
            )));
        }

        let mut next = current.clone();
        next.apply(&patch)?;

        let stored = match self.store.update_permission(&next).await {
            Ok(stored) => stored,
            Err(e @ AuthzError::VersionConflict { .. }) => {
                self.refresh(&current.name).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.cache.write().await.upsert(stored.clone());

        info!(name = %stored.name, version = stored.version, "Permission updated");
        self.events
            .publish(CatalogEvent::PermissionUpdated {
                permission_id: stored.id,
                name: stored.name.clone(),
            })
            .await;
        Ok(stored)
    }

    /// Delete a custom permission that no role references.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> AuthzResult<()> {
        let current = self.get(id).await?;
        if current.is_system {
            return Err(AuthzError::InvalidArgument(format!(
                "system permission '{}' cannot be deleted",
                current.name
            )));
        }

        let holders = self.roles_referencing(&current.name).await?;
        if !holders.is_empty() {
            return Err(AuthzError::InvalidArgument(format!(
                "permission '{}' is still assigned to roles: {}",
                current.name,
                holders.join(", ")
            )));
        }

        self.store.delete_permission(id).await?;
        self.cache.write().await.remove(&id);

        info!(name = %current.name, "Permission deleted");
        self.events
            .publish(CatalogEvent::PermissionDeleted {
                permission_id: id,
                name: current.name,
            })
            .await;
        Ok(())
    }

    /// Case-insensitive substring search over name, description, resource,
    /// action and category.
    pub async fn search(&self, query: &str) -> Vec<Permission> {
        let mut hits: Vec<Permission> = self
            .cache
            .read()
            .await
            .values()
            .filter(|p| p.matches_query(query))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits
    }

    /// Fetch by id.
    pub async fn get(&self, id: Uuid) -> AuthzResult<Permission> {
        self.cache
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AuthzError::NotFound(format!("permission {}", id)))
    }

    /// Fetch by name.
    pub async fn find_by_name(&self, name: &str) -> Option<Permission> {
        self.cache.read().await.get_by_name(name).cloned()
    }

    /// Whether a permission name is in the catalog.
    pub async fn exists(&self, name: &str) -> bool {
        self.cache.read().await.contains_name(name)
    }

    /// Fail with `InvalidArgument` on the first name missing from the catalog.
    pub async fn require_all(&self, names: &[String]) -> AuthzResult<()> {
        let cache = self.cache.read().await;
        match names.iter().find(|n| !cache.contains_name(n)) {
            Some(missing) => Err(AuthzError::InvalidArgument(format!(
                "permission '{}' does not exist",
                missing
            ))),
            None => Ok(()),
        }
    }

    /// All permissions, sorted by name.
    pub async fn list(&self) -> Vec<Permission> {
        self.cache.read().await.sorted()
    }

    /// Permissions of one resource, sorted by name.
    pub async fn list_by_resource(&self, resource: &str) -> Vec<Permission> {
        self.list()
            .await
            .into_iter()
            .filter(|p| p.resource == resource)
            .collect()
    }

    /// Replace the cache with the store's content.
    pub async fn reload(&self) -> AuthzResult<usize> {
        let all = self.store.find_all_permissions().await?;
        let count = all.len();
        self.cache.write().await.replace_all(all);
        debug!(count, "Permission cache loaded");
        Ok(count)
    }

    /// Seed the system permissions.
    ///
    /// Missing entries are created in the store, then the cache is reloaded.
    /// If the store fails, the system permissions are placed in the cache only
    /// so request-time checks do not start from an empty catalog.
    #[instrument(skip(self))]
    pub async fn seed_system_permissions(&self) -> AuthzResult<SeedOutcome> {
        match self.seed_into_store().await {
            Ok(created) => {
                self.reload().await?;
                info!(created, "System permissions seeded");
                Ok(SeedOutcome::Persisted { created })
            }
            Err(e) => {
                warn!(error = %e, "Seeding system permissions failed, using in-memory seed");
                let mut cache = self.cache.write().await;
                let mut seeded = 0;
                for permission in SystemResource::system_permissions() {
                    if !cache.contains_name(&permission.name) {
                        cache.upsert(permission);
                        seeded += 1;
                    }
                }
                Ok(SeedOutcome::InMemoryOnly { seeded })
            }
        }
    }

    async fn seed_into_store(&self) -> AuthzResult<usize> {
        let mut created = 0;
        for permission in SystemResource::system_permissions() {
            if self
                .store
                .find_permission_by_name(&permission.name)
                .await?
                .is_none()
            {
                self.store.create_permission(&permission).await?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Create the given permissions, skipping names already present.
    /// Returns the names created.
    pub(crate) async fn ensure_permissions(
        &self,
        permissions: Vec<Permission>,
    ) -> AuthzResult<Vec<String>> {
        let mut created = Vec::new();
        for permission in permissions {
            if self.exists(&permission.name).await {
                debug!(name = %permission.name, "Permission already exists, skipping");
                continue;
            }
            match self.store.create_permission(&permission).await {
                Ok(stored) => {
                    created.push(stored.name.clone());
                    self.cache.write().await.upsert(stored);
                }
                Err(AuthzError::Conflict(_)) => self.refresh(&permission.name).await,
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    /// Delete permissions by name without the system or role-reference
    /// checks. Returns the names removed.
    pub(crate) async fn remove_permissions(&self, names: &[String]) -> AuthzResult<Vec<String>> {
        let mut removed = Vec::new();
        for name in names {
            let Some(permission) = self.find_by_name(name).await else {
                continue;
            };
            match self.store.delete_permission(permission.id).await {
                Ok(()) | Err(AuthzError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            self.cache.write().await.remove(&permission.id);
            removed.push(permission.name);
        }
        Ok(removed)
    }

    /// Delete every permission of a resource. Returns the names removed.
    pub(crate) async fn remove_by_resource(&self, resource: &str) -> AuthzResult<Vec<String>> {
        let names: Vec<String> = self
            .list_by_resource(resource)
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        self.remove_permissions(&names).await
    }

    /// Roles whose attribute bag lists a permission.
    async fn roles_referencing(&self, name: &str) -> AuthzResult<Vec<String>> {
        let mut holders = Vec::new();
        for role in self.identity.list_roles().await? {
            let attrs = RoleAttributes::from_bag(&role.attributes)?;
            if attrs.permissions.iter().any(|p| p == name) {
                holders.push(role.name);
            }
        }
        Ok(holders)
    }

    /// Re-read one entry from the store after a lost write.
    async fn refresh(&self, name: &str) {
        match self.store.find_permission_by_name(name).await {
            Ok(Some(fresh)) => self.cache.write().await.upsert(fresh),
            Ok(None) => {
                self.cache.write().await.remove_by_name(name);
            }
            Err(e) => warn!(name = %name, error = %e, "Failed to refresh cached permission"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentityProvider;
    use crate::store::MemoryCatalogStore;
    use async_trait::async_trait;
    use gatehouse_model::{AttributeBag, Resource};

    fn catalog() -> (PermissionCatalog, Arc<MemoryIdentityProvider>) {
        let idp = Arc::new(MemoryIdentityProvider::new());
        let catalog = PermissionCatalog::new(
            Arc::new(MemoryCatalogStore::new()),
            idp.clone(),
            EventPublisher::disabled(),
        );
        (catalog, idp)
    }

    fn request(name: &str) -> NewPermission {
        let mut parts = name.split(':');
        NewPermission {
            name: name.to_string(),
            description: format!("Allows {}", name),
            resource: parts.next().unwrap_or_default().to_string(),
            action: parts.next().unwrap_or_default().to_string(),
            scope: parts.next().map(str::to_string),
            category: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_conflict() {
        let (catalog, _) = catalog();
        catalog.create(request("documents:read")).await.unwrap();
        catalog.create(request("documents:read:own")).await.unwrap();

        let err = catalog.create(request("documents:read")).await.unwrap_err();
        assert!(matches!(err, AuthzError::Conflict(_)));
        assert_eq!(catalog.list_by_resource("documents").await.len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_names() {
        let (catalog, _) = catalog();
        for bad in ["bad name", "Documents:read", "documents"] {
            let mut req = request("documents:read");
            req.name = bad.to_string();
            assert!(matches!(
                catalog.create(req).await,
                Err(AuthzError::InvalidArgument(_))
            ));
        }
        assert!(catalog.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_only_touches_mutable_fields() {
        let (catalog, _) = catalog();
        let p = catalog.create(request("reports:export")).await.unwrap();

        let updated = catalog
            .update(
                p.id,
                PermissionPatch {
                    description: Some("Export reports".into()),
                    category: Some("reporting".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "reports:export");
        assert_eq!(updated.category, "reporting");
        assert_eq!(updated.version, 1);
        assert_eq!(catalog.search("REPORTING").await.len(), 1);
    }

    #[tokio::test]
    async fn test_system_permissions_are_immutable() {
        let (catalog, _) = catalog();
        catalog.seed_system_permissions().await.unwrap();
        let p = catalog.find_by_name("users:read").await.unwrap();

        assert!(matches!(
            catalog.update(p.id, PermissionPatch::default()).await,
            Err(AuthzError::InvalidArgument(_))
        ));
        assert!(matches!(
            catalog.delete(p.id).await,
            Err(AuthzError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_blocked_while_role_references() {
        let (catalog, idp) = catalog();
        let p = catalog.create(request("reports:export")).await.unwrap();

        let bag = RoleAttributes {
            permissions: vec!["reports:export".into()],
            ..Default::default()
        }
        .into_bag();
        idp.create_role("analyst", "", bag).await.unwrap();

        let err = catalog.delete(p.id).await.unwrap_err();
        assert!(matches!(err, AuthzError::InvalidArgument(ref m) if m.contains("analyst")));

        idp.delete_role("analyst").await.unwrap();
        catalog.delete(p.id).await.unwrap();
        assert!(!catalog.exists("reports:export").await);
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let (catalog, _) = catalog();
        let expected = SystemResource::system_permissions().len();

        assert_eq!(
            catalog.seed_system_permissions().await.unwrap(),
            SeedOutcome::Persisted { created: expected }
        );
        assert_eq!(
            catalog.seed_system_permissions().await.unwrap(),
            SeedOutcome::Persisted { created: 0 }
        );
        assert_eq!(catalog.list().await.len(), expected);
    }

    #[tokio::test]
    async fn test_require_all_names_first_missing() {
        let (catalog, _) = catalog();
        catalog.create(request("reports:export")).await.unwrap();

        assert!(catalog
            .require_all(&["reports:export".to_string()])
            .await
            .is_ok());
        let err = catalog
            .require_all(&["reports:export".to_string(), "reports:purge".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidArgument(ref m) if m.contains("reports:purge")));
    }

    struct UnavailableStore;

    #[async_trait]
    impl CatalogStore for UnavailableStore {
        async fn create_resource(&self, _: &Resource) -> AuthzResult<Resource> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn find_resource_by_name(&self, _: &str) -> AuthzResult<Option<Resource>> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn find_all_resources(&self) -> AuthzResult<Vec<Resource>> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn update_resource(&self, _: &Resource) -> AuthzResult<Resource> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn delete_resource(&self, _: Uuid) -> AuthzResult<()> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn create_permission(&self, _: &Permission) -> AuthzResult<Permission> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn find_permission_by_name(&self, _: &str) -> AuthzResult<Option<Permission>> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn find_all_permissions(&self) -> AuthzResult<Vec<Permission>> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn update_permission(&self, _: &Permission) -> AuthzResult<Permission> {
            Err(AuthzError::Store("unavailable".into()))
        }
        async fn delete_permission(&self, _: Uuid) -> AuthzResult<()> {
            Err(AuthzError::Store("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_seeding_falls_back_to_memory() {
        let catalog = PermissionCatalog::new(
            Arc::new(UnavailableStore),
            Arc::new(MemoryIdentityProvider::new()),
            EventPublisher::disabled(),
        );

        let outcome = catalog.seed_system_permissions().await.unwrap();
        let expected = SystemResource::system_permissions().len();
        assert_eq!(outcome, SeedOutcome::InMemoryOnly { seeded: expected });
        assert!(catalog.exists("roles:assign_permissions").await);
        assert!(catalog.exists("files:upload:own").await);
    }

    #[tokio::test]
    async fn test_corrupt_role_bag_blocks_delete() {
        let (catalog, idp) = catalog();
        let p = catalog.create(request("reports:export")).await.unwrap();

        let mut bag = AttributeBag::new();
        bag.insert("_version".into(), vec!["not-a-number".into()]);
        idp.create_role("broken", "", bag).await.unwrap();

        assert!(matches!(
            catalog.delete(p.id).await,
            Err(AuthzError::Provider(_))
        ));
    }
}
