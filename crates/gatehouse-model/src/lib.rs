//! # Gatehouse Model
//!
//! Data model for the gatehouse authorization engine.
//!
//! ## Overview
//!
//! The gatehouse-model crate handles:
//! - **Resources**: Named domain object categories and their actions
//! - **Permissions**: Canonical `resource:action[:scope]` names and catalog entries
//! - **Roles**: Named permission bundles, optionally composite
//! - **Attributes**: Typed encoding of engine data in identity provider attribute bags
//! - **Errors**: The shared `AuthzError` taxonomy
//!
//! ## Architecture
//!
//! ```text
//! Resource ──(one per action)──→ Permission
//!                                    ↑ (by name)
//! Role ──permissions─────────────────┘
//!   └─child_roles──→ Role ...
//!
//! User ──roles──→ Role
//!   └─direct_permissions──→ Permission (by name)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use gatehouse_model::{NewResource, PermissionName, Resource};
//!
//! let resource = Resource::new(
//!     NewResource::new("documents", "Company documents", ["read", "approve"])
//!         .with_default_scope("own"),
//! )
//! .unwrap();
//!
//! let names: Vec<String> = resource
//!     .permission_names()
//!     .iter()
//!     .map(PermissionName::to_string)
//!     .collect();
//! assert_eq!(names, vec!["documents:read:own", "documents:approve:own"]);
//! ```
//!
//! No I/O happens here; the services live in `gatehouse-engine`.

pub mod actions;
pub mod attributes;
pub mod error;
pub mod permissions;
pub mod resources;
pub mod roles;
pub mod user;

// Re-export main types for convenience
pub use actions::Action;
pub use attributes::{AttributeBag, RoleAttributes, UserAttributes};
pub use error::{AuthzError, AuthzResult};
pub use permissions::{NewPermission, Permission, PermissionName, PermissionPatch, PermissionSet};
pub use resources::{NewResource, Resource, ResourcePatch, SystemResource};
pub use roles::{NewRole, Role, RolePatch, SystemRole};
pub use user::{Principal, UserAuthorizationState};
