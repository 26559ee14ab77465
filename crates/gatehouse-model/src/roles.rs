//! Roles
//!
//! A role is a named bundle of permission names, optionally composite
//! (including child roles). Role storage belongs to the identity provider;
//! these types are the engine's view of it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attributes::RoleAttributes;
use crate::error::{AuthzError, AuthzResult};
use crate::resources::SystemResource;

static ROLE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("role name pattern is valid"));

/// Built-in roles that cannot be modified or deleted.
///
/// # Examples
///
/// ```
/// use gatehouse_model::SystemRole;
///
/// assert_eq!(SystemRole::parse("admin"), Some(SystemRole::Admin));
/// assert_eq!(SystemRole::parse("SUPER_ADMIN"), Some(SystemRole::SuperAdmin));
/// assert_eq!(SystemRole::parse("editor"), None);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    /// Regular account holder
    User = 0,

    /// Manages users and roles
    Admin = 1,

    /// Unrestricted access to the catalogs
    SuperAdmin = 2,
}

impl SystemRole {
    /// Parse role from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    /// Get string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    /// Get a human-readable display name for the role.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Admin => "Administrator",
            Self::SuperAdmin => "Super Administrator",
        }
    }

    /// Get all system roles.
    pub fn all() -> Vec<Self> {
        vec![Self::User, Self::Admin, Self::SuperAdmin]
    }

    /// Permission names the role is seeded with.
    ///
    /// - **SuperAdmin**: every system permission
    /// - **Admin**: every system permission except deleting catalog entries
    /// - **User**: own profile and own files
    pub fn default_permissions(&self) -> Vec<String> {
        let system: Vec<String> = SystemResource::system_permissions()
            .into_iter()
            .map(|p| p.name)
            .collect();

        match self {
            Self::SuperAdmin => system,
            Self::Admin => system
                .into_iter()
                .filter(|p| p != "resources:delete" && p != "permissions:delete")
                .collect(),
            Self::User => system
                .into_iter()
                .filter(|p| p.starts_with("profile:") || p.starts_with("files:"))
                .collect(),
        }
    }

    /// Build the creation request used for seeding.
    pub fn to_new_role(&self) -> NewRole {
        NewRole::new(self.as_str(), self.display_name(), self.default_permissions())
    }
}

impl Default for SystemRole {
    fn default() -> Self {
        Self::User
    }
}

/// A role as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Identity provider id.
    pub id: String,
    /// Unique name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Permission names granted by this role.
    pub permissions: Vec<String>,
    /// Whether the role includes child roles.
    pub composite: bool,
    /// Child role names.
    pub child_roles: Vec<String>,
    /// Custom attributes.
    pub attributes: BTreeMap<String, String>,
    /// Write counter for compare-and-swap updates.
    pub version: u64,
}

impl Role {
    /// Assemble from provider data.
    pub fn from_parts(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        attrs: RoleAttributes,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            permissions: attrs.permissions,
            composite: attrs.composite,
            child_roles: attrs.child_roles,
            attributes: attrs.custom,
            version: attrs.version,
        }
    }

    /// Structured attributes to write back to the provider.
    pub fn to_attributes(&self) -> RoleAttributes {
        RoleAttributes {
            permissions: self.permissions.clone(),
            composite: self.composite,
            child_roles: self.child_roles.clone(),
            custom: self.attributes.clone(),
            version: self.version,
        }
    }

    /// Check whether the role lists a permission directly.
    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Input for creating a role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRole {
    /// Unique name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Permission names.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Whether the role includes child roles.
    #[serde(default)]
    pub composite: bool,
    /// Child role names (only linked when `composite` is set).
    #[serde(default)]
    pub child_roles: Vec<String>,
    /// Custom attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl NewRole {
    /// Create a non-composite role request.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        permissions: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            permissions,
            ..Default::default()
        }
    }

    /// Make the role composite over the given children.
    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.composite = true;
        self.child_roles = children;
        self
    }

    /// Add a custom attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Partial update for a role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePatch {
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement permission list.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    /// Toggle composite.
    #[serde(default)]
    pub composite: Option<bool>,
    /// Desired child set; the delta against the current set is applied.
    #[serde(default)]
    pub child_roles: Option<Vec<String>>,
    /// Custom attributes merged into the current ones.
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, String>>,
}

/// Check that a role name is usable.
///
/// Names are letters, digits, `_`, `.` and `-`, and may not be `.` or `..`.
/// They end up as a single path segment in identity provider URLs.
pub fn validate_role_name(name: &str) -> AuthzResult<()> {
    if !ROLE_NAME_PATTERN.is_match(name) || name == "." || name == ".." {
        return Err(AuthzError::InvalidArgument(format!(
            "role name '{}' may only contain letters, digits, '_', '.' and '-'",
            name
        )));
    }
    Ok(())
}
