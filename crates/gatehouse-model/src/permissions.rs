//! # Permissions
//!
//! Core permission types for the authorization engine.
//! A permission name is the canonical triple `resource:action[:scope]`.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::actions::IDENTIFIER_PATTERN;
use crate::error::{AuthzError, AuthzResult};

static PERMISSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_]+:[a-z_]+(:[a-z_]+)?$").expect("permission pattern is valid")
});

/// Category given to permissions created without one.
pub const DEFAULT_PERMISSION_CATEGORY: &str = "general";

/// A canonical permission name.
///
/// # Example
///
/// ```
/// use gatehouse_model::permissions::PermissionName;
///
/// let name = PermissionName::parse("documents:read:own").unwrap();
/// assert_eq!(name.resource(), "documents");
/// assert_eq!(name.action(), "read");
/// assert_eq!(name.scope(), Some("own"));
/// assert_eq!(name.to_string(), "documents:read:own");
///
/// assert!(PermissionName::parse("Documents:read").is_err());
/// assert!(PermissionName::parse("documents").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionName {
    resource: String,
    action: String,
    scope: Option<String>,
}

impl PermissionName {
    /// Build a permission name from its parts, validating each one.
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        scope: Option<String>,
    ) -> AuthzResult<Self> {
        let name = Self {
            resource: resource.into(),
            action: action.into(),
            scope,
        };

        let parts_valid = IDENTIFIER_PATTERN.is_match(&name.resource)
            && IDENTIFIER_PATTERN.is_match(&name.action)
            && name
                .scope
                .as_deref()
                .map_or(true, |s| IDENTIFIER_PATTERN.is_match(s));

        if parts_valid {
            Ok(name)
        } else {
            Err(invalid_name(&name.to_string()))
        }
    }

    /// Parse a canonical name (e.g., "documents:read" or "documents:read:own").
    pub fn parse(s: &str) -> AuthzResult<Self> {
        if !PERMISSION_PATTERN.is_match(s) {
            return Err(invalid_name(s));
        }

        let mut parts = s.split(':');
        let resource = parts.next().unwrap_or_default().to_string();
        let action = parts.next().unwrap_or_default().to_string();
        let scope = parts.next().map(str::to_string);

        Ok(Self {
            resource,
            action,
            scope,
        })
    }

    /// Resource part.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Action part.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Optional scope part.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }
}

fn invalid_name(name: &str) -> AuthzError {
    AuthzError::InvalidArgument(format!(
        "permission name '{}' must match resource:action[:scope] using lowercase letters and underscores",
        name
    ))
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}:{}", self.resource, self.action, scope),
            None => write!(f, "{}:{}", self.resource, self.action),
        }
    }
}

impl FromStr for PermissionName {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PermissionName {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PermissionName> for String {
    fn from(name: PermissionName) -> Self {
        name.to_string()
    }
}

/// Validate a list of permission names, returning them de-duplicated in input order.
pub fn validate_permission_names(names: &[String]) -> AuthzResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        PermissionName::parse(name)?;
        if seen.insert(name.as_str()) {
            out.push(name.clone());
        }
    }
    Ok(out)
}

/// A permission entry in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Store-generated opaque id.
    pub id: Uuid,
    /// Canonical name, globally unique.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Resource part of the name.
    pub resource: String,
    /// Action part of the name.
    pub action: String,
    /// Scope qualifier. Editable after creation; the name keeps the scope it was created with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Grouping label.
    pub category: String,
    /// Seeded permissions are immutable and undeletable.
    pub is_system: bool,
    /// Incremented by the store on every successful update.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    /// Create a custom permission for a validated name.
    pub fn new(name: &PermissionName, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: description.into(),
            resource: name.resource().to_string(),
            action: name.action().to_string(),
            scope: name.scope().map(str::to_string),
            category: DEFAULT_PERMISSION_CATEGORY.to_string(),
            is_system: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Mark as a system permission.
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Apply a partial update. Name, resource and action never change.
    pub fn apply(&mut self, patch: &PermissionPatch) -> AuthzResult<()> {
        if let Some(ref scope) = patch.scope {
            if !IDENTIFIER_PATTERN.is_match(scope) {
                return Err(AuthzError::InvalidArgument(format!(
                    "scope '{}' must contain only lowercase letters and underscores",
                    scope
                )));
            }
            self.scope = Some(scope.clone());
        }
        if let Some(ref description) = patch.description {
            self.description = description.clone();
        }
        if let Some(ref category) = patch.category {
            self.category = category.clone();
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Case-insensitive substring match over name, description, resource, action and category.
    pub fn matches_query(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        [
            &self.name,
            &self.description,
            &self.resource,
            &self.action,
            &self.category,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&q))
    }
}

/// Input for creating a permission directly through the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPermission {
    /// Canonical name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Resource part; must agree with the name.
    pub resource: String,
    /// Action part; must agree with the name.
    pub action: String,
    /// Scope part; must agree with the name.
    #[serde(default)]
    pub scope: Option<String>,
    /// Optional category.
    #[serde(default)]
    pub category: Option<String>,
}

impl NewPermission {
    /// Validate the name and its agreement with the resource/action/scope fields.
    pub fn validate(&self) -> AuthzResult<PermissionName> {
        let name = PermissionName::parse(&self.name)?;
        if name.resource() != self.resource
            || name.action() != self.action
            || name.scope() != self.scope.as_deref()
        {
            return Err(AuthzError::InvalidArgument(format!(
                "permission name '{}' does not match resource '{}', action '{}' and scope {:?}",
                self.name, self.resource, self.action, self.scope
            )));
        }
        Ok(name)
    }

    /// Build the catalog entry for a validated request.
    pub fn into_permission(self, name: &PermissionName) -> Permission {
        let permission = Permission::new(name, self.description);
        match self.category {
            Some(category) => permission.with_category(category),
            None => permission,
        }
    }
}

/// Partial update for a permission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionPatch {
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New scope qualifier.
    #[serde(default)]
    pub scope: Option<String>,
    /// New category.
    #[serde(default)]
    pub category: Option<String>,
}

/// A de-duplicated set of permission names.
///
/// Used for effective permission sets; membership is exact.
///
/// # Example
///
/// ```
/// use gatehouse_model::permissions::PermissionSet;
///
/// let mut set = PermissionSet::new();
/// set.add("documents:read");
/// set.add("documents:read");
/// set.add("documents:approve");
///
/// assert!(set.has("documents:read"));
/// assert_eq!(set.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    permissions: HashSet<String>,
}

impl PermissionSet {
    /// Create a new empty permission set.
    pub fn new() -> Self {
        Self {
            permissions: HashSet::new(),
        }
    }

    /// Add a permission to the set.
    pub fn add(&mut self, permission: impl Into<String>) {
        self.permissions.insert(permission.into());
    }

    /// Add multiple permissions to the set.
    pub fn add_all<I, S>(&mut self, permissions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for perm in permissions {
            self.add(perm);
        }
    }

    /// Remove a permission, returning whether it was present.
    pub fn remove(&mut self, permission: &str) -> bool {
        self.permissions.remove(permission)
    }

    /// Check if the set contains a permission.
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Merge another permission set into this one.
    pub fn merge(&mut self, other: &PermissionSet) {
        for perm in &other.permissions {
            self.permissions.insert(perm.clone());
        }
    }

    /// Create from a list of permission strings.
    pub fn from_strings(perms: &[&str]) -> Self {
        perms.iter().map(|p| p.to_string()).collect()
    }

    /// Iterate over the names in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.permissions.iter()
    }

    /// Names sorted lexicographically.
    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut names: Vec<String> = self.permissions.iter().cloned().collect();
        names.sort();
        names
    }

    /// Get the count of permissions.
    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Check if this set contains every name from `required`.
    pub fn contains_all<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|p| self.has(p.as_ref()))
    }

    /// Check if this set contains at least one name from `candidates`.
    pub fn contains_any<S: AsRef<str>>(&self, candidates: &[S]) -> bool {
        candidates.iter().any(|p| self.has(p.as_ref()))
    }
}

impl FromIterator<String> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            permissions: iter.into_iter().collect(),
        }
    }
}
