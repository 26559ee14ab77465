//! Role store.
//!
//! Roles live in the identity provider. Their permission list, child roles
//! and custom attributes are kept in the role's attribute bag and written
//! compare-and-swap on the bag's `_version`.

use gatehouse_events::CatalogEvent;
use gatehouse_model::attributes::validate_custom_attributes;
use gatehouse_model::permissions::validate_permission_names;
use gatehouse_model::roles::validate_role_name;
use gatehouse_model::{AuthzError, AuthzResult, NewRole, Role, RoleAttributes, RolePatch, SystemRole};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::catalog::PermissionCatalog;
use crate::identity::{IdentityProvider, ProviderUser};
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::sync::EventPublisher;

/// Role behaviour switches.
#[derive(Debug, Clone)]
pub struct RoleStoreOptions {
    /// Require catalog existence for permissions on create and update.
    pub strict_permissions: bool,
    /// Role names protected like the built-in system roles.
    pub protected_roles: Vec<String>,
    /// Retry policy for versioned writes.
    pub retry: RetryConfig,
}

impl Default for RoleStoreOptions {
    fn default() -> Self {
        Self {
            strict_permissions: true,
            protected_roles: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

/// Store of roles backed by the identity provider.
pub struct RoleStore {
    identity: Arc<dyn IdentityProvider>,
    catalog: Arc<PermissionCatalog>,
    events: EventPublisher,
    strict_permissions: bool,
    protected: HashSet<String>,
    retry: RetryConfig,
}

impl RoleStore {
    /// Create a role store.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        catalog: Arc<PermissionCatalog>,
        events: EventPublisher,
        options: RoleStoreOptions,
    ) -> Self {
        let protected = SystemRole::all()
            .iter()
            .map(|r| r.as_str().to_string())
            .chain(options.protected_roles)
            .collect();

        Self {
            identity,
            catalog,
            events,
            strict_permissions: options.strict_permissions,
            protected,
            retry: options.retry,
        }
    }

    /// Whether a role is a system role.
    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(name)
    }

    /// Create a role.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: NewRole) -> AuthzResult<Role> {
        validate_role_name(&request.name)?;
        validate_custom_attributes(&request.attributes)?;
        let permissions = validate_permission_names(&request.permissions)?;
        if self.strict_permissions {
            self.catalog.require_all(&permissions).await?;
        }

        match self.identity.get_role_by_name(&request.name).await {
            Ok(_) => {
                return Err(AuthzError::Conflict(format!(
                    "role '{}' already exists",
                    request.name
                )))
            }
            Err(AuthzError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let children = if request.composite {
            self.validate_children(&request.name, &request.child_roles)
                .await?
        } else {
            Vec::new()
        };

        let role = self
            .create_in_provider(
                &request.name,
                &request.description,
                RoleAttributes {
                    permissions,
                    composite: request.composite,
                    child_roles: children,
                    custom: request.attributes,
                    version: 0,
                },
            )
            .await?;

        info!(permissions = role.permissions.len(), "Role created");
        self.events
            .publish(CatalogEvent::RoleCreated {
                name: role.name.clone(),
            })
            .await;
        Ok(role)
    }

    /// Fetch a role.
    pub async fn get(&self, name: &str) -> AuthzResult<Role> {
        validate_role_name(name)?;
        self.identity.get_role_by_name(name).await?.into_role()
    }

    /// All roles, sorted by name. Provider failures yield an empty list.
    pub async fn list(&self) -> Vec<Role> {
        let provider_roles = match self.identity.list_roles().await {
            Ok(roles) => roles,
            Err(e) => {
                warn!(error = %e, "Listing roles failed, returning empty list");
                return Vec::new();
            }
        };

        let mut roles: Vec<Role> = provider_roles
            .into_iter()
            .filter_map(|r| {
                let name = r.name.clone();
                r.into_role()
                    .map_err(|e| warn!(role = %name, error = %e, "Skipping unreadable role"))
                    .ok()
            })
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }

    /// Update a role.
    ///
    /// Custom attributes are merged key by key. For a composite role, a new
    /// child list is applied as a delta against the linked children.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, name: &str, patch: RolePatch) -> AuthzResult<Role> {
        self.ensure_mutable(name)?;
        if let Some(ref attributes) = patch.attributes {
            validate_custom_attributes(attributes)?;
        }
        let permissions = match patch.permissions {
            Some(ref names) => {
                let names = validate_permission_names(names)?;
                if self.strict_permissions {
                    self.catalog.require_all(&names).await?;
                }
                Some(names)
            }
            None => None,
        };
        if let Some(ref children) = patch.child_roles {
            self.validate_children(name, children).await?;
        }

        let patch = &patch;
        let permissions = &permissions;
        let (role, linked, unlinked) = retry_on_conflict(&self.retry, name, move || async move {
            let current = self.get(name).await?;
            let mut next = current.clone();

            if let Some(ref description) = patch.description {
                next.description = description.clone();
            }
            if let Some(permissions) = permissions {
                next.permissions = permissions.clone();
            }
            if let Some(composite) = patch.composite {
                next.composite = composite;
            }
            if let Some(ref attributes) = patch.attributes {
                next.attributes.extend(attributes.clone());
            }
            if !next.composite {
                next.child_roles.clear();
            } else if let Some(ref children) = patch.child_roles {
                next.child_roles = dedup(children);
            }

            let linked: Vec<String> = next
                .child_roles
                .iter()
                .filter(|c| !current.child_roles.contains(c))
                .cloned()
                .collect();
            let unlinked: Vec<String> = current
                .child_roles
                .iter()
                .filter(|c| !next.child_roles.contains(c))
                .cloned()
                .collect();

            let role = self.write(&next).await?;
            Ok((role, linked, unlinked))
        })
        .await?;

        if !unlinked.is_empty() {
            self.identity.remove_composites(name, &unlinked).await?;
        }
        if !linked.is_empty() {
            self.identity.add_composites(name, &linked).await?;
        }

        info!(
            version = role.version,
            linked = linked.len(),
            unlinked = unlinked.len(),
            "Role updated"
        );
        self.events
            .publish(CatalogEvent::RoleUpdated {
                name: role.name.clone(),
            })
            .await;
        Ok(role)
    }

    /// Delete a role nobody holds.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> AuthzResult<()> {
        validate_role_name(name)?;
        if self.is_protected(name) {
            return Err(AuthzError::InvalidArgument(format!(
                "system role '{}' cannot be deleted",
                name
            )));
        }

        let holders = self.identity.users_with_role(name).await?;
        if !holders.is_empty() {
            return Err(AuthzError::InvalidArgument(format!(
                "role '{}' is still held by {} user(s)",
                name,
                holders.len()
            )));
        }

        self.identity.delete_role(name).await?;
        info!("Role deleted");
        self.events
            .publish(CatalogEvent::RoleDeleted {
                name: name.to_string(),
            })
            .await;
        Ok(())
    }

    /// Add catalog permissions to a role.
    #[instrument(skip(self, permissions))]
    pub async fn add_permissions(&self, name: &str, permissions: &[String]) -> AuthzResult<Role> {
        self.ensure_mutable(name)?;
        let permissions = validate_permission_names(permissions)?;
        self.catalog.require_all(&permissions).await?;

        let requested = &permissions;
        let role = retry_on_conflict(&self.retry, name, move || async move {
            let mut role = self.get(name).await?;
            for permission in requested {
                if !role.grants(permission) {
                    role.permissions.push(permission.clone());
                }
            }
            self.write(&role).await
        })
        .await?;

        info!(added = permissions.len(), "Permissions added to role");
        self.events
            .publish(CatalogEvent::RoleUpdated {
                name: role.name.clone(),
            })
            .await;
        Ok(role)
    }

    /// Remove one permission from a role.
    #[instrument(skip(self))]
    pub async fn remove_permission(&self, name: &str, permission: &str) -> AuthzResult<Role> {
        self.ensure_mutable(name)?;

        let role = retry_on_conflict(&self.retry, name, move || async move {
            let mut role = self.get(name).await?;
            if !role.grants(permission) {
                return Err(AuthzError::NotFound(format!(
                    "permission '{}' is not assigned to role '{}'",
                    permission, name
                )));
            }
            role.permissions.retain(|p| p != permission);
            self.write(&role).await
        })
        .await?;

        info!("Permission removed from role");
        self.events
            .publish(CatalogEvent::RoleUpdated {
                name: role.name.clone(),
            })
            .await;
        Ok(role)
    }

    /// Create the built-in roles that do not exist yet. Returns how many were
    /// created.
    #[instrument(skip(self))]
    pub async fn seed_system_roles(&self) -> AuthzResult<usize> {
        let mut created = 0;
        for system in SystemRole::all() {
            match self.identity.get_role_by_name(system.as_str()).await {
                Ok(_) => continue,
                Err(AuthzError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }

            let request = system.to_new_role();
            self.create_in_provider(
                &request.name,
                &request.description,
                RoleAttributes {
                    permissions: request.permissions,
                    ..Default::default()
                },
            )
            .await?;
            created += 1;
        }

        info!(created, "System roles seeded");
        Ok(created)
    }

    /// Map roles to a user. Roles the user already holds are skipped.
    /// Returns the user's roles afterwards.
    #[instrument(skip(self))]
    pub async fn assign_to_user(&self, user_id: &str, roles: &[String]) -> AuthzResult<Vec<String>> {
        self.identity.get_user(user_id).await?;
        for role in roles {
            validate_role_name(role)?;
            self.identity.get_role_by_name(role).await?;
        }

        let current = self.identity.get_user_roles(user_id).await?;
        let missing: Vec<String> = dedup(roles)
            .into_iter()
            .filter(|r| !current.contains(r))
            .collect();

        if missing.is_empty() {
            debug!("User already holds every requested role");
            return Ok(current);
        }

        self.identity.assign_roles_to_user(user_id, &missing).await?;
        info!(assigned = ?missing, "Roles assigned to user");
        self.events
            .publish(CatalogEvent::UserRolesAssigned {
                user_id: user_id.to_string(),
                roles: missing,
            })
            .await;
        self.identity.get_user_roles(user_id).await
    }

    /// Unmap roles from a user. Returns the user's roles afterwards.
    #[instrument(skip(self))]
    pub async fn remove_from_user(
        &self,
        user_id: &str,
        roles: &[String],
    ) -> AuthzResult<Vec<String>> {
        self.identity.get_user(user_id).await?;
        for role in roles {
            validate_role_name(role)?;
            self.identity.get_role_by_name(role).await?;
        }

        let current = self.identity.get_user_roles(user_id).await?;
        let held: Vec<String> = dedup(roles)
            .into_iter()
            .filter(|r| current.contains(r))
            .collect();

        if held.is_empty() {
            return Ok(current);
        }

        self.identity.remove_roles_from_user(user_id, &held).await?;
        info!(removed = ?held, "Roles removed from user");
        self.events
            .publish(CatalogEvent::UserRolesRemoved {
                user_id: user_id.to_string(),
                roles: held,
            })
            .await;
        self.identity.get_user_roles(user_id).await
    }

    /// Users holding a role.
    pub async fn users_with_role(&self, name: &str) -> AuthzResult<Vec<ProviderUser>> {
        self.identity.users_with_role(name).await
    }

    fn ensure_mutable(&self, name: &str) -> AuthzResult<()> {
        validate_role_name(name)?;
        if self.is_protected(name) {
            return Err(AuthzError::InvalidArgument(format!(
                "system role '{}' cannot be modified",
                name
            )));
        }
        Ok(())
    }

    async fn validate_children(&self, name: &str, children: &[String]) -> AuthzResult<Vec<String>> {
        let children = dedup(children);
        for child in &children {
            validate_role_name(child)?;
            if child == name {
                return Err(AuthzError::InvalidArgument(format!(
                    "role '{}' cannot include itself",
                    name
                )));
            }
            match self.identity.get_role_by_name(child).await {
                Ok(_) => {}
                Err(AuthzError::NotFound(_)) => {
                    return Err(AuthzError::InvalidArgument(format!(
                        "child role '{}' does not exist",
                        child
                    )))
                }
                Err(e) => return Err(e),
            }
        }
        Ok(children)
    }

    async fn create_in_provider(
        &self,
        name: &str,
        description: &str,
        attrs: RoleAttributes,
    ) -> AuthzResult<Role> {
        let children = attrs.child_roles.clone();
        let created = self
            .identity
            .create_role(name, description, attrs.into_bag())
            .await?;
        if !children.is_empty() {
            self.identity.add_composites(name, &children).await?;
        }
        created.into_role()
    }

    async fn write(&self, role: &Role) -> AuthzResult<Role> {
        self.identity
            .update_role(
                &role.name,
                &role.description,
                role.to_attributes().into_bag(),
                role.version,
            )
            .await?
            .into_role()
    }
}

fn dedup(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect()
}
