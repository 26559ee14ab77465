//! Effective permission resolution.
//!
//! A user's effective permissions are the union of their direct grants and
//! every permission reachable through their roles, following composite roles
//! down to their children.

use gatehouse_events::CatalogEvent;
use gatehouse_model::permissions::validate_permission_names;
use gatehouse_model::{
    AuthzError, AuthzResult, PermissionSet, RoleAttributes, UserAttributes,
    UserAuthorizationState,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::catalog::PermissionCatalog;
use crate::identity::IdentityProvider;
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::sync::EventPublisher;

type ExpandFuture<'a> = Pin<Box<dyn Future<Output = AuthzResult<()>> + Send + 'a>>;

/// Bookkeeping for one resolution.
#[derive(Debug, Default)]
struct Expansion {
    /// Roles on the current path, for cycle detection.
    path: Vec<String>,
    /// Roles already expanded, with the shallowest depth they were reached at.
    visited: HashMap<String, usize>,
    /// Accumulated permissions.
    permissions: PermissionSet,
}

/// Computes effective permissions and manages direct grants.
pub struct EffectivePermissionResolver {
    identity: Arc<dyn IdentityProvider>,
    catalog: Arc<PermissionCatalog>,
    events: EventPublisher,
    max_depth: usize,
    retry: RetryConfig,
}

impl EffectivePermissionResolver {
    /// Create a resolver.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        catalog: Arc<PermissionCatalog>,
        events: EventPublisher,
        max_depth: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            identity,
            catalog,
            events,
            max_depth,
            retry,
        }
    }

    /// Resolve a user's roles, direct grants and effective permissions.
    #[instrument(skip(self))]
    pub async fn resolve_for_user(&self, user_id: &str) -> AuthzResult<UserAuthorizationState> {
        let user = self.identity.get_user(user_id).await?;
        let attrs = UserAttributes::from_bag(&user.attributes)?;
        let roles = self.identity.get_user_roles(user_id).await?;

        let mut expansion = Expansion::default();
        expansion
            .permissions
            .add_all(attrs.direct_permissions.iter().cloned());
        for role in &roles {
            self.expand(role.clone(), 0, &mut expansion).await?;
        }

        debug!(
            roles = roles.len(),
            effective = expansion.permissions.len(),
            "Resolved user permissions"
        );
        Ok(UserAuthorizationState {
            user_id: user_id.to_string(),
            roles,
            direct_permissions: attrs.direct_permissions,
            effective_permissions: expansion.permissions,
        })
    }

    /// Whether a user's effective set contains a permission.
    pub async fn has_permission(&self, user_id: &str, permission: &str) -> AuthzResult<bool> {
        Ok(self
            .resolve_for_user(user_id)
            .await?
            .has_permission(permission))
    }

    /// Grant catalog permissions directly to a user.
    #[instrument(skip(self, permissions))]
    pub async fn assign_direct(
        &self,
        user_id: &str,
        permissions: &[String],
    ) -> AuthzResult<UserAuthorizationState> {
        self.identity.get_user(user_id).await?;
        let permissions = validate_permission_names(permissions)?;
        self.catalog.require_all(&permissions).await?;

        let requested = &permissions;
        let added = retry_on_conflict(&self.retry, user_id, move || async move {
            let user = self.identity.get_user(user_id).await?;
            let mut attrs = UserAttributes::from_bag(&user.attributes)?;

            let added: Vec<String> = requested
                .iter()
                .filter(|p| !attrs.direct_permissions.contains(p))
                .cloned()
                .collect();
            if added.is_empty() {
                return Ok(added);
            }

            attrs.direct_permissions.extend(added.iter().cloned());
            let version = attrs.version;
            self.identity
                .update_user_attributes(user_id, attrs.into_bag(), version)
                .await?;
            Ok(added)
        })
        .await?;

        if !added.is_empty() {
            info!(added = ?added, "Direct permissions assigned");
            self.events
                .publish(CatalogEvent::UserPermissionsAssigned {
                    user_id: user_id.to_string(),
                    permissions: added,
                })
                .await;
        }
        self.resolve_for_user(user_id).await
    }

    /// Revoke direct grants. Names the user does not hold are ignored.
    #[instrument(skip(self, permissions))]
    pub async fn revoke_direct(
        &self,
        user_id: &str,
        permissions: &[String],
    ) -> AuthzResult<UserAuthorizationState> {
        let requested = permissions;
        let revoked = retry_on_conflict(&self.retry, user_id, move || async move {
            let user = self.identity.get_user(user_id).await?;
            let mut attrs = UserAttributes::from_bag(&user.attributes)?;

            let revoked: Vec<String> = attrs
                .direct_permissions
                .iter()
                .filter(|p| requested.contains(p))
                .cloned()
                .collect();
            if revoked.is_empty() {
                return Ok(revoked);
            }

            attrs.direct_permissions.retain(|p| !requested.contains(p));
            let version = attrs.version;
            self.identity
                .update_user_attributes(user_id, attrs.into_bag(), version)
                .await?;
            Ok(revoked)
        })
        .await?;

        if !revoked.is_empty() {
            info!(revoked = ?revoked, "Direct permissions revoked");
            self.events
                .publish(CatalogEvent::UserPermissionsRevoked {
                    user_id: user_id.to_string(),
                    permissions: revoked,
                })
                .await;
        }
        self.resolve_for_user(user_id).await
    }

    /// Role names mapped to a user. Provider failures yield an empty list.
    pub async fn user_roles(&self, user_id: &str) -> Vec<String> {
        match self.identity.get_user_roles(user_id).await {
            Ok(roles) => roles,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Listing user roles failed, returning empty list");
                Vec::new()
            }
        }
    }

    /// Add a role's permissions and, for composite roles, its children's.
    ///
    /// A role already on the current path is a cycle and is skipped. A role
    /// expanded earlier at the same or a shallower depth is not expanded
    /// again; reaching it at a shallower depth expands it again so children
    /// cut off by the depth limit the first time are included.
    fn expand<'a>(
        &'a self,
        name: String,
        depth: usize,
        expansion: &'a mut Expansion,
    ) -> ExpandFuture<'a> {
        Box::pin(async move {
            if expansion.path.contains(&name) {
                warn!(role = %name, path = ?expansion.path, "Composite role cycle skipped");
                return Ok(());
            }
            if depth > self.max_depth {
                warn!(role = %name, depth, "Composite role nesting too deep, branch skipped");
                return Ok(());
            }
            if matches!(expansion.visited.get(&name), Some(&seen) if seen <= depth) {
                debug!(role = %name, "Role already expanded");
                return Ok(());
            }

            let role = match self.identity.get_role_by_name(&name).await {
                Ok(role) => role,
                Err(AuthzError::NotFound(_)) => {
                    warn!(role = %name, "Role mapped to user no longer exists, skipped");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let attrs = RoleAttributes::from_bag(&role.attributes)?;

            expansion.permissions.add_all(attrs.permissions);
            expansion.visited.insert(name.clone(), depth);

            if attrs.composite || role.composite {
                expansion.path.push(name);
                for child in attrs.child_roles {
                    self.expand(child, depth + 1, expansion).await?;
                }
                expansion.path.pop();
            }
            Ok(())
        })
    }
}
