//! Persistent catalog store seam.
//!
//! Resources and permissions survive restarts through a `CatalogStore`. Each
//! record carries a system-generated id distinct from its name and a version
//! counter used to reject stale updates.

use async_trait::async_trait;
use gatehouse_model::{AuthzError, AuthzResult, Permission, Resource};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence for resource and permission records.
///
/// `update_*` takes the record as read (its `version` is the expected stored
/// version) and returns it with the incremented version.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Persist a new resource. Fails with `Conflict` on a duplicate name.
    async fn create_resource(&self, resource: &Resource) -> AuthzResult<Resource>;

    /// Find a resource by name.
    async fn find_resource_by_name(&self, name: &str) -> AuthzResult<Option<Resource>>;

    /// Load every resource.
    async fn find_all_resources(&self) -> AuthzResult<Vec<Resource>>;

    /// Replace a resource. Fails with `VersionConflict` on a stale version.
    async fn update_resource(&self, resource: &Resource) -> AuthzResult<Resource>;

    /// Delete a resource by id.
    async fn delete_resource(&self, id: Uuid) -> AuthzResult<()>;

    /// Persist a new permission. Fails with `Conflict` on a duplicate name.
    async fn create_permission(&self, permission: &Permission) -> AuthzResult<Permission>;

    /// Find a permission by name.
    async fn find_permission_by_name(&self, name: &str) -> AuthzResult<Option<Permission>>;

    /// Load every permission.
    async fn find_all_permissions(&self) -> AuthzResult<Vec<Permission>>;

    /// Replace a permission. Fails with `VersionConflict` on a stale version.
    async fn update_permission(&self, permission: &Permission) -> AuthzResult<Permission>;

    /// Delete a permission by id.
    async fn delete_permission(&self, id: Uuid) -> AuthzResult<()>;
}

/// In-process catalog store.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    resources: RwLock<HashMap<Uuid, Resource>>,
    permissions: RwLock<HashMap<Uuid, Permission>>,
}

impl MemoryCatalogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_version(entity: String, expected: u64, actual: u64) -> AuthzResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(AuthzError::VersionConflict {
            entity,
            expected,
            actual,
        })
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn create_resource(&self, resource: &Resource) -> AuthzResult<Resource> {
        let mut resources = self.resources.write().await;
        if resources.values().any(|r| r.name == resource.name) {
            return Err(AuthzError::Conflict(format!(
                "resource '{}' already exists",
                resource.name
            )));
        }
        resources.insert(resource.id, resource.clone());
        Ok(resource.clone())
    }

    async fn find_resource_by_name(&self, name: &str) -> AuthzResult<Option<Resource>> {
        let resources = self.resources.read().await;
        Ok(resources.values().find(|r| r.name == name).cloned())
    }

    async fn find_all_resources(&self) -> AuthzResult<Vec<Resource>> {
        Ok(self.resources.read().await.values().cloned().collect())
    }

    async fn update_resource(&self, resource: &Resource) -> AuthzResult<Resource> {
        let mut resources = self.resources.write().await;
        let stored = resources
            .get_mut(&resource.id)
            .ok_or_else(|| AuthzError::NotFound(format!("resource {}", resource.id)))?;
        check_version(
            format!("resource {}", resource.name),
            resource.version,
            stored.version,
        )?;

        let mut updated = resource.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_resource(&self, id: Uuid) -> AuthzResult<()> {
        self.resources
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AuthzError::NotFound(format!("resource {}", id)))
    }

    async fn create_permission(&self, permission: &Permission) -> AuthzResult<Permission> {
        let mut permissions = self.permissions.write().await;
        if permissions.values().any(|p| p.name == permission.name) {
            return Err(AuthzError::Conflict(format!(
                "permission '{}' already exists",
                permission.name
            )));
        }
        permissions.insert(permission.id, permission.clone());
        Ok(permission.clone())
    }

    async fn find_permission_by_name(&self, name: &str) -> AuthzResult<Option<Permission>> {
        let permissions = self.permissions.read().await;
        Ok(permissions.values().find(|p| p.name == name).cloned())
    }

    async fn find_all_permissions(&self) -> AuthzResult<Vec<Permission>> {
        Ok(self.permissions.read().await.values().cloned().collect())
    }

    async fn update_permission(&self, permission: &Permission) -> AuthzResult<Permission> {
        let mut permissions = self.permissions.write().await;
        let stored = permissions
            .get_mut(&permission.id)
            .ok_or_else(|| AuthzError::NotFound(format!("permission {}", permission.id)))?;
        check_version(
            format!("permission {}", permission.name),
            permission.version,
            stored.version,
        )?;

        let mut updated = permission.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_permission(&self, id: Uuid) -> AuthzResult<()> {
        self.permissions
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AuthzError::NotFound(format!("permission {}", id)))
    }
}
