//! # Actions
//!
//! Actions are verbs scoped to a resource. Resources define their own action
//! sets, so any lowercase identifier is a valid action; the [`Action`] enum
//! only names the verbs used by the built-in system resources.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{AuthzError, AuthzResult};

/// Pattern shared by action names, resource names and scopes.
pub(crate) static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_]+$").expect("identifier pattern is valid"));

/// Verbs used by the system resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create new instances.
    Create,
    /// Read a single instance.
    Read,
    /// Modify an existing instance.
    Update,
    /// Remove an instance.
    Delete,
    /// Browse and search instances.
    List,
    /// Attach roles to a user.
    AssignRoles,
    /// Attach permissions to a role or user.
    AssignPermissions,
    /// Upload a file.
    Upload,
}

impl Action {
    /// Get the string representation of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::List => "list",
            Action::AssignRoles => "assign_roles",
            Action::AssignPermissions => "assign_permissions",
            Action::Upload => "upload",
        }
    }

    /// The standard CRUD verbs plus `list`.
    pub fn crud() -> Vec<Self> {
        vec![
            Action::Create,
            Action::Read,
            Action::Update,
            Action::Delete,
            Action::List,
        ]
    }
}

/// Check that a single action name matches `^[a-z_]+$`.
pub fn validate_action(action: &str) -> AuthzResult<()> {
    if IDENTIFIER_PATTERN.is_match(action) {
        Ok(())
    } else {
        Err(AuthzError::InvalidArgument(format!(
            "action '{}' must contain only lowercase letters and underscores",
            action
        )))
    }
}

/// Validate an action set for a resource.
///
/// The set must be non-empty, free of duplicates, and every action must be a
/// valid identifier. Order is preserved so permission generation is stable.
///
/// # Example
///
/// ```
/// use gatehouse_model::actions::validate_actions;
///
/// assert!(validate_actions(&["read".to_string(), "approve".to_string()]).is_ok());
/// assert!(validate_actions(&[]).is_err());
/// assert!(validate_actions(&["read".to_string(), "read".to_string()]).is_err());
/// assert!(validate_actions(&["Read".to_string()]).is_err());
/// ```
pub fn validate_actions(actions: &[String]) -> AuthzResult<()> {
    if actions.is_empty() {
        return Err(AuthzError::InvalidArgument(
            "a resource must define at least one action".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for action in actions {
        validate_action(action)?;
        if !seen.insert(action.as_str()) {
            return Err(AuthzError::InvalidArgument(format!(
                "duplicate action '{}'",
                action
            )));
        }
    }

    Ok(())
}
