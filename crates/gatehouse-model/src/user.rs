//! User-side authorization types
//!
//! The authenticated principal supplied by the request pipeline, and the
//! computed authorization state of a user.

use serde::{Deserialize, Serialize};

use crate::permissions::PermissionSet;

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Identity provider user id.
    pub user_id: String,
    /// Login name.
    pub username: String,
}

impl Principal {
    /// Create a principal.
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// A user's roles and permissions, computed on demand.
///
/// Never stored; `roles` comes from the provider's role mapping and
/// `direct_permissions` from the user's attribute bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAuthorizationState {
    /// Identity provider user id.
    pub user_id: String,
    /// Role names mapped to the user.
    pub roles: Vec<String>,
    /// Permission names granted directly.
    pub direct_permissions: Vec<String>,
    /// Union of direct grants and everything reachable through roles.
    pub effective_permissions: PermissionSet,
}

impl UserAuthorizationState {
    /// Check membership in the effective set.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.effective_permissions.has(permission)
    }
}
