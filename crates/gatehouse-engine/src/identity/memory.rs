//! In-process identity provider.

use async_trait::async_trait;
use gatehouse_model::attributes::write_version;
use gatehouse_model::{AttributeBag, AuthzError, AuthzResult};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{next_version, IdentityProvider, ProviderRole, ProviderUser};

#[derive(Debug, Default)]
struct State {
    roles: HashMap<String, ProviderRole>,
    composites: HashMap<String, BTreeSet<String>>,
    users: HashMap<String, ProviderUser>,
    mappings: HashMap<String, BTreeSet<String>>,
}

impl State {
    fn role(&self, name: &str) -> AuthzResult<&ProviderRole> {
        self.roles
            .get(name)
            .ok_or_else(|| AuthzError::NotFound(format!("role '{}'", name)))
    }

    fn user(&self, user_id: &str) -> AuthzResult<&ProviderUser> {
        self.users
            .get(user_id)
            .ok_or_else(|| AuthzError::NotFound(format!("user '{}'", user_id)))
    }

    fn require_roles(&self, names: &[String]) -> AuthzResult<()> {
        names.iter().try_for_each(|n| self.role(n).map(|_| ()))
    }

    fn with_composite_flag(&self, role: &ProviderRole) -> ProviderRole {
        let mut role = role.clone();
        role.composite = self
            .composites
            .get(&role.name)
            .map_or(false, |c| !c.is_empty());
        role
    }
}

/// Identity provider holding roles, users and mappings in memory.
///
/// Behaves like a real provider for everything the engine uses, including
/// versioned attribute writes.
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    state: RwLock<State>,
}

impl MemoryIdentityProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with an empty attribute bag.
    pub async fn add_user(&self, user_id: impl Into<String>, username: impl Into<String>) {
        self.add_user_with_attributes(user_id, username, AttributeBag::new())
            .await;
    }

    /// Register a user with the given attributes.
    pub async fn add_user_with_attributes(
        &self,
        user_id: impl Into<String>,
        username: impl Into<String>,
        attributes: AttributeBag,
    ) {
        let user = ProviderUser {
            id: user_id.into(),
            username: username.into(),
            enabled: true,
            attributes,
        };
        self.state.write().await.users.insert(user.id.clone(), user);
    }

    /// Child role names linked under a role.
    pub async fn composites_of(&self, name: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .composites
            .get(name)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn get_role_by_name(&self, name: &str) -> AuthzResult<ProviderRole> {
        let state = self.state.read().await;
        let role = state.role(name)?;
        Ok(state.with_composite_flag(role))
    }

    async fn list_roles(&self) -> AuthzResult<Vec<ProviderRole>> {
        let state = self.state.read().await;
        let mut roles: Vec<ProviderRole> = state
            .roles
            .values()
            .map(|r| state.with_composite_flag(r))
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn create_role(
        &self,
        name: &str,
        description: &str,
        attributes: AttributeBag,
    ) -> AuthzResult<ProviderRole> {
        let mut state = self.state.write().await;
        if state.roles.contains_key(name) {
            return Err(AuthzError::Conflict(format!("role '{}' already exists", name)));
        }

        let role = ProviderRole {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            composite: false,
            attributes,
        };
        state.roles.insert(name.to_string(), role.clone());
        Ok(role)
    }

    async fn update_role(
        &self,
        name: &str,
        description: &str,
        mut attributes: AttributeBag,
        expected_version: u64,
    ) -> AuthzResult<ProviderRole> {
        let mut state = self.state.write().await;
        let next = next_version(
            &format!("role {}", name),
            &state.role(name)?.attributes,
            expected_version,
        )?;
        write_version(&mut attributes, next);

        let role = state
            .roles
            .get_mut(name)
            .ok_or_else(|| AuthzError::NotFound(format!("role '{}'", name)))?;
        role.description = description.to_string();
        role.attributes = attributes;
        let role = role.clone();
        Ok(state.with_composite_flag(&role))
    }

    async fn delete_role(&self, name: &str) -> AuthzResult<()> {
        let mut state = self.state.write().await;
        state.role(name)?;

        state.roles.remove(name);
        state.composites.remove(name);
        for children in state.composites.values_mut() {
            children.remove(name);
        }
        for roles in state.mappings.values_mut() {
            roles.remove(name);
        }
        Ok(())
    }

    async fn add_composites(&self, name: &str, children: &[String]) -> AuthzResult<()> {
        let mut state = self.state.write().await;
        state.role(name)?;
        state.require_roles(children)?;
        state
            .composites
            .entry(name.to_string())
            .or_default()
            .extend(children.iter().cloned());
        Ok(())
    }

    async fn remove_composites(&self, name: &str, children: &[String]) -> AuthzResult<()> {
        let mut state = self.state.write().await;
        state.role(name)?;
        if let Some(linked) = state.composites.get_mut(name) {
            for child in children {
                linked.remove(child);
            }
        }
        Ok(())
    }

    async fn users_with_role(&self, name: &str) -> AuthzResult<Vec<ProviderUser>> {
        let state = self.state.read().await;
        state.role(name)?;
        let mut users: Vec<ProviderUser> = state
            .mappings
            .iter()
            .filter(|(_, roles)| roles.contains(name))
            .filter_map(|(user_id, _)| state.users.get(user_id).cloned())
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn get_user(&self, user_id: &str) -> AuthzResult<ProviderUser> {
        self.state.read().await.user(user_id).cloned()
    }

    async fn update_user_attributes(
        &self,
        user_id: &str,
        mut attributes: AttributeBag,
        expected_version: u64,
    ) -> AuthzResult<ProviderUser> {
        let mut state = self.state.write().await;
        let next = next_version(
            &format!("user {}", user_id),
            &state.user(user_id)?.attributes,
            expected_version,
        )?;
        write_version(&mut attributes, next);

        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| AuthzError::NotFound(format!("user '{}'", user_id)))?;
        user.attributes = attributes;
        Ok(user.clone())
    }

    async fn get_user_roles(&self, user_id: &str) -> AuthzResult<Vec<String>> {
        let state = self.state.read().await;
        state.user(user_id)?;
        Ok(state
            .mappings
            .get(user_id)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn assign_roles_to_user(&self, user_id: &str, roles: &[String]) -> AuthzResult<()> {
        let mut state = self.state.write().await;
        state.user(user_id)?;
        state.require_roles(roles)?;
        state
            .mappings
            .entry(user_id.to_string())
            .or_default()
            .extend(roles.iter().cloned());
        Ok(())
    }

    async fn remove_roles_from_user(&self, user_id: &str, roles: &[String]) -> AuthzResult<()> {
        let mut state = self.state.write().await;
        state.user(user_id)?;
        if let Some(mapped) = state.mappings.get_mut(user_id) {
            for role in roles {
                mapped.remove(role);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_model::attributes::read_version;

    #[tokio::test]
    async fn test_role_lifecycle() {
        let idp = MemoryIdentityProvider::new();
        idp.create_role("auditor", "Audits things", AttributeBag::new())
            .await
            .unwrap();

        assert!(matches!(
            idp.create_role("auditor", "again", AttributeBag::new()).await,
            Err(AuthzError::Conflict(_))
        ));

        let role = idp.get_role_by_name("auditor").await.unwrap();
        assert_eq!(role.description, "Audits things");

        idp.delete_role("auditor").await.unwrap();
        assert!(matches!(
            idp.get_role_by_name("auditor").await,
            Err(AuthzError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_versioned_role_writes() {
        let idp = MemoryIdentityProvider::new();
        idp.create_role("auditor", "", AttributeBag::new())
            .await
            .unwrap();

        let updated = idp
            .update_role("auditor", "v1", AttributeBag::new(), 0)
            .await
            .unwrap();
        assert_eq!(read_version(&updated.attributes).unwrap(), 1);

        let stale = idp
            .update_role("auditor", "lost", AttributeBag::new(), 0)
            .await;
        assert!(matches!(stale, Err(AuthzError::VersionConflict { .. })));
        assert_eq!(
            idp.get_role_by_name("auditor").await.unwrap().description,
            "v1"
        );
    }

    #[tokio::test]
    async fn test_composites_set_native_flag() {
        let idp = MemoryIdentityProvider::new();
        idp.create_role("manager", "", AttributeBag::new())
            .await
            .unwrap();
        idp.create_role("clerk", "", AttributeBag::new())
            .await
            .unwrap();

        idp.add_composites("manager", &["clerk".to_string()])
            .await
            .unwrap();
        assert!(idp.get_role_by_name("manager").await.unwrap().composite);
        assert_eq!(idp.composites_of("manager").await, vec!["clerk"]);

        assert!(matches!(
            idp.add_composites("manager", &["ghost".to_string()]).await,
            Err(AuthzError::NotFound(_))
        ));

        idp.remove_composites("manager", &["clerk".to_string()])
            .await
            .unwrap();
        assert!(!idp.get_role_by_name("manager").await.unwrap().composite);
    }

    #[tokio::test]
    async fn test_user_mappings() {
        let idp = MemoryIdentityProvider::new();
        idp.add_user("u1", "alice").await;
        idp.create_role("auditor", "", AttributeBag::new())
            .await
            .unwrap();

        idp.assign_roles_to_user("u1", &["auditor".to_string()])
            .await
            .unwrap();
        assert_eq!(idp.get_user_roles("u1").await.unwrap(), vec!["auditor"]);
        assert_eq!(idp.users_with_role("auditor").await.unwrap().len(), 1);

        idp.delete_role("auditor").await.unwrap();
        assert!(idp.get_user_roles("u1").await.unwrap().is_empty());

        assert!(matches!(
            idp.get_user_roles("nobody").await,
            Err(AuthzError::NotFound(_))
        ));
    }
}
