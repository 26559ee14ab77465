//! # Resources
//!
//! A resource is a named domain object category ("documents", "invoices")
//! together with the actions that can be performed on it. Creating a resource
//! generates one permission per action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actions::{validate_actions, Action, IDENTIFIER_PATTERN};
use crate::error::{AuthzError, AuthzResult};
use crate::permissions::{Permission, PermissionName};

/// Category given to resources created without one.
pub const DEFAULT_RESOURCE_CATEGORY: &str = "general";

/// Check that a resource name matches `^[a-z_]+$`.
pub fn validate_resource_name(name: &str) -> AuthzResult<()> {
    if IDENTIFIER_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(AuthzError::InvalidArgument(format!(
            "resource name '{}' must contain only lowercase letters and underscores",
            name
        )))
    }
}

fn validate_scope(scope: &str) -> AuthzResult<()> {
    if IDENTIFIER_PATTERN.is_match(scope) {
        Ok(())
    } else {
        Err(AuthzError::InvalidArgument(format!(
            "default scope '{}' must contain only lowercase letters and underscores",
            scope
        )))
    }
}

/// A registered resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Store-generated opaque id.
    pub id: Uuid,
    /// Unique name (lowercase and underscores).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Allowed actions, non-empty and duplicate-free.
    pub actions: Vec<String>,
    /// Grouping label.
    pub category: String,
    /// Scope appended to every generated permission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_scope: Option<String>,
    /// Seeded resources are immutable and undeletable.
    pub is_system: bool,
    /// Incremented by the store on every successful update.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Validate a creation request and build the resource.
    pub fn new(request: NewResource) -> AuthzResult<Self> {
        validate_resource_name(&request.name)?;
        validate_actions(&request.actions)?;
        if let Some(ref scope) = request.default_scope {
            validate_scope(scope)?;
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            name: request.name,
            description: request.description,
            actions: request.actions,
            category: request
                .category
                .unwrap_or_else(|| DEFAULT_RESOURCE_CATEGORY.to_string()),
            default_scope: request.default_scope,
            is_system: false,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Mark as a system resource.
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Canonical names of the permissions this resource generates.
    pub fn permission_names(&self) -> Vec<PermissionName> {
        self.actions
            .iter()
            .filter_map(|action| {
                PermissionName::new(self.name.clone(), action.clone(), self.default_scope.clone())
                    .ok()
            })
            .collect()
    }

    /// Catalog entries for every action, inheriting category and system flag.
    pub fn generated_permissions(&self) -> Vec<Permission> {
        self.permission_names()
            .iter()
            .map(|name| {
                let description = match name.scope() {
                    Some(scope) => format!(
                        "Can {} {} ({})",
                        name.action().replace('_', " "),
                        self.name,
                        scope
                    ),
                    None => format!("Can {} {}", name.action().replace('_', " "), self.name),
                };
                let permission = Permission::new(name, description).with_category(&self.category);
                if self.is_system {
                    permission.system()
                } else {
                    permission
                }
            })
            .collect()
    }

    /// Apply a partial update.
    ///
    /// Returns `true` when the generated permission names changed (actions or
    /// default scope), meaning dependent permissions must be regenerated.
    pub fn apply(&mut self, patch: ResourcePatch) -> AuthzResult<bool> {
        if let Some(ref actions) = patch.actions {
            validate_actions(actions)?;
        }
        if let Some(Some(ref scope)) = patch.default_scope {
            validate_scope(scope)?;
        }

        let before = self.permission_names();

        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(actions) = patch.actions {
            self.actions = actions;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(default_scope) = patch.default_scope {
            self.default_scope = default_scope;
        }
        self.updated_at = Utc::now();

        Ok(before != self.permission_names())
    }

    /// Case-insensitive substring match over name, description, category and actions.
    pub fn matches_query(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.name.to_lowercase().contains(&q)
            || self.description.to_lowercase().contains(&q)
            || self.category.to_lowercase().contains(&q)
            || self.actions.iter().any(|a| a.to_lowercase().contains(&q))
    }
}

/// Input for registering a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewResource {
    /// Unique name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Allowed actions.
    pub actions: Vec<String>,
    /// Optional category.
    #[serde(default)]
    pub category: Option<String>,
    /// Optional scope suffix for generated permissions.
    #[serde(default)]
    pub default_scope: Option<String>,
}

impl NewResource {
    /// Create a request with a name, description and actions.
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        description: impl Into<String>,
        actions: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            category: None,
            default_scope: None,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the default scope.
    pub fn with_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = Some(scope.into());
        self
    }
}

/// Partial update for a resource. The name is immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePatch {
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement action set.
    #[serde(default)]
    pub actions: Option<Vec<String>>,
    /// New category.
    #[serde(default)]
    pub category: Option<String>,
    /// `Some(None)` clears the default scope.
    #[serde(default)]
    pub default_scope: Option<Option<String>>,
}

/// Resources seeded at startup.
///
/// # Example
///
/// ```
/// use gatehouse_model::resources::SystemResource;
///
/// assert_eq!(SystemResource::Profile.as_str(), "profile");
/// assert_eq!(SystemResource::Profile.default_scope(), Some("own"));
/// assert!(SystemResource::is_system_resource("roles"));
/// assert!(!SystemResource::is_system_resource("invoices"));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SystemResource {
    /// User accounts.
    Users,
    /// Roles.
    Roles,
    /// Permission catalog entries.
    Permissions,
    /// Resource registry entries.
    Resources,
    /// The caller's own profile.
    Profile,
    /// Uploaded files such as avatars.
    Files,
}

impl SystemResource {
    /// Get the resource name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemResource::Users => "users",
            SystemResource::Roles => "roles",
            SystemResource::Permissions => "permissions",
            SystemResource::Resources => "resources",
            SystemResource::Profile => "profile",
            SystemResource::Files => "files",
        }
    }

    /// Get the description.
    pub fn description(&self) -> &'static str {
        match self {
            SystemResource::Users => "User accounts",
            SystemResource::Roles => "Roles and their permission bundles",
            SystemResource::Permissions => "Permission catalog",
            SystemResource::Resources => "Resource registry",
            SystemResource::Profile => "The caller's own profile",
            SystemResource::Files => "Uploaded files",
        }
    }

    /// Get the category.
    pub fn category(&self) -> &'static str {
        match self {
            SystemResource::Users => "identity",
            SystemResource::Roles | SystemResource::Permissions | SystemResource::Resources => {
                "authorization"
            }
            SystemResource::Profile => "account",
            SystemResource::Files => "storage",
        }
    }

    /// Get the allowed actions.
    pub fn actions(&self) -> Vec<&'static str> {
        let mut actions: Vec<&'static str> = match self {
            SystemResource::Profile => vec![Action::Read.as_str(), Action::Update.as_str()],
            SystemResource::Files => vec![
                Action::Upload.as_str(),
                Action::Read.as_str(),
                Action::Delete.as_str(),
            ],
            _ => Action::crud().iter().map(Action::as_str).collect(),
        };
        match self {
            SystemResource::Users => actions.push(Action::AssignRoles.as_str()),
            SystemResource::Roles => actions.push(Action::AssignPermissions.as_str()),
            _ => {}
        }
        actions
    }

    /// Get the default scope.
    pub fn default_scope(&self) -> Option<&'static str> {
        match self {
            SystemResource::Profile | SystemResource::Files => Some("own"),
            _ => None,
        }
    }

    /// Registration request for seeding.
    pub fn to_new_resource(&self) -> NewResource {
        NewResource {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            actions: self.actions().into_iter().map(str::to_string).collect(),
            category: Some(self.category().to_string()),
            default_scope: self.default_scope().map(str::to_string),
        }
    }

    /// Build the seeded resource entity.
    pub fn to_resource(&self) -> AuthzResult<Resource> {
        Ok(Resource::new(self.to_new_resource())?.system())
    }

    /// Get all system resources.
    pub fn all() -> Vec<Self> {
        vec![
            SystemResource::Users,
            SystemResource::Roles,
            SystemResource::Permissions,
            SystemResource::Resources,
            SystemResource::Profile,
            SystemResource::Files,
        ]
    }

    /// Check whether a name belongs to a system resource.
    pub fn is_system_resource(name: &str) -> bool {
        Self::all().iter().any(|r| r.as_str() == name)
    }

    /// Every permission generated from the system resources, flagged as system.
    pub fn system_permissions() -> Vec<Permission> {
        Self::all()
            .iter()
            .filter_map(|r| r.to_resource().ok())
            .flat_map(|r| r.generated_permissions())
            .collect()
    }
}
