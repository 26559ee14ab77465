//! Identity provider seam.
//!
//! Roles and users live in an external identity provider. The engine stores
//! its structured data in the provider's attribute bags and relies on the
//! provider's native role mappings and composite links.
//!
//! - `memory`: in-process provider for embedded deployments and tests
//! - `http`: Keycloak-compatible admin REST API client

pub mod http;
pub mod memory;

use async_trait::async_trait;
use gatehouse_model::attributes::read_version;
use gatehouse_model::{AttributeBag, AuthzError, AuthzResult, Role, RoleAttributes};
use serde::{Deserialize, Serialize};

pub use http::HttpIdentityProvider;
pub use memory::MemoryIdentityProvider;

/// A role as stored by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRole {
    /// Provider-assigned id.
    pub id: String,
    /// Unique role name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Whether the provider has composite links for this role.
    pub composite: bool,
    /// Raw attribute bag.
    pub attributes: AttributeBag,
}

impl ProviderRole {
    /// Decode the engine's view of this role.
    pub fn into_role(self) -> AuthzResult<Role> {
        let mut attrs = RoleAttributes::from_bag(&self.attributes)?;
        attrs.composite = attrs.composite || self.composite;
        Ok(Role::from_parts(self.id, self.name, self.description, attrs))
    }
}

/// A user as stored by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUser {
    /// Provider-assigned id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Whether the account is enabled.
    pub enabled: bool,
    /// Raw attribute bag.
    pub attributes: AttributeBag,
}

/// Operations the engine needs from an identity provider.
///
/// Attribute writes are compare-and-swap: they carry the `_version` that was
/// read and fail with `VersionConflict` when the stored version differs. A
/// successful write stores `expected_version + 1`.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch a role. Fails with `NotFound` if it does not exist.
    async fn get_role_by_name(&self, name: &str) -> AuthzResult<ProviderRole>;

    /// List every role.
    async fn list_roles(&self) -> AuthzResult<Vec<ProviderRole>>;

    /// Create a role. Fails with `Conflict` if the name is taken.
    async fn create_role(
        &self,
        name: &str,
        description: &str,
        attributes: AttributeBag,
    ) -> AuthzResult<ProviderRole>;

    /// Replace a role's description and attributes.
    async fn update_role(
        &self,
        name: &str,
        description: &str,
        attributes: AttributeBag,
        expected_version: u64,
    ) -> AuthzResult<ProviderRole>;

    /// Delete a role.
    async fn delete_role(&self, name: &str) -> AuthzResult<()>;

    /// Link child roles under a composite role.
    async fn add_composites(&self, name: &str, children: &[String]) -> AuthzResult<()>;

    /// Unlink child roles from a composite role.
    async fn remove_composites(&self, name: &str, children: &[String]) -> AuthzResult<()>;

    /// Users holding a role.
    async fn users_with_role(&self, name: &str) -> AuthzResult<Vec<ProviderUser>>;

    /// Fetch a user. Fails with `NotFound` if it does not exist.
    async fn get_user(&self, user_id: &str) -> AuthzResult<ProviderUser>;

    /// Replace a user's attributes.
    async fn update_user_attributes(
        &self,
        user_id: &str,
        attributes: AttributeBag,
        expected_version: u64,
    ) -> AuthzResult<ProviderUser>;

    /// Role names mapped to a user.
    async fn get_user_roles(&self, user_id: &str) -> AuthzResult<Vec<String>>;

    /// Map roles to a user.
    async fn assign_roles_to_user(&self, user_id: &str, roles: &[String]) -> AuthzResult<()>;

    /// Unmap roles from a user.
    async fn remove_roles_from_user(&self, user_id: &str, roles: &[String]) -> AuthzResult<()>;
}

/// Check the stored version against the one the writer read and return the
/// version to store next.
pub fn next_version(entity: &str, stored: &AttributeBag, expected: u64) -> AuthzResult<u64> {
    let actual = read_version(stored)?;
    if actual != expected {
        return Err(AuthzError::VersionConflict {
            entity: entity.to_string(),
            expected,
            actual,
        });
    }
    Ok(expected + 1)
}
