//! Typed views over identity provider attribute bags
//!
//! Identity providers store free-form, multi-valued attributes on roles and
//! users. The engine keeps structured data there under reserved keys; this
//! module is the only place that knows the layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AuthzError, AuthzResult};

/// Raw attribute bag as stored by the identity provider.
pub type AttributeBag = BTreeMap<String, Vec<String>>;

/// Permission names granted by a role.
pub const PERMISSIONS_KEY: &str = "permissions";
/// Whether a role is composite ("true"/"false").
pub const COMPOSITE_KEY: &str = "composite";
/// Names of a composite role's children.
pub const CHILD_ROLES_KEY: &str = "child_roles";
/// Permission names granted directly to a user.
pub const DIRECT_PERMISSIONS_KEY: &str = "direct_permissions";
/// Write counter used for compare-and-swap updates.
pub const VERSION_KEY: &str = "_version";

const RESERVED_KEYS: [&str; 5] = [
    PERMISSIONS_KEY,
    COMPOSITE_KEY,
    CHILD_ROLES_KEY,
    DIRECT_PERMISSIONS_KEY,
    VERSION_KEY,
];

/// Check whether a key is reserved for engine data.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Reject custom attributes that would shadow reserved keys.
pub fn validate_custom_attributes(custom: &BTreeMap<String, String>) -> AuthzResult<()> {
    match custom.keys().find(|k| is_reserved_key(k)) {
        Some(key) => Err(AuthzError::InvalidArgument(format!(
            "attribute key '{}' is reserved",
            key
        ))),
        None => Ok(()),
    }
}

/// Read the write counter from a bag. A missing counter reads as zero.
pub fn read_version(bag: &AttributeBag) -> AuthzResult<u64> {
    match bag.get(VERSION_KEY).and_then(|v| v.first()) {
        None => Ok(0),
        Some(raw) => raw.parse().map_err(|_| {
            AuthzError::Provider(format!("attribute '{}' is not a number: {}", VERSION_KEY, raw))
        }),
    }
}

/// Overwrite the write counter in a bag.
pub fn write_version(bag: &mut AttributeBag, version: u64) {
    bag.insert(VERSION_KEY.to_string(), vec![version.to_string()]);
}

/// Structured role data kept in the role's attribute bag.
///
/// # Example
///
/// ```
/// use gatehouse_model::attributes::RoleAttributes;
///
/// let attrs = RoleAttributes {
///     permissions: vec!["documents:read".into()],
///     ..Default::default()
/// };
/// let bag = attrs.clone().into_bag();
/// assert_eq!(RoleAttributes::from_bag(&bag).unwrap(), attrs);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAttributes {
    /// Permission names granted by the role.
    pub permissions: Vec<String>,
    /// Whether the role includes child roles.
    pub composite: bool,
    /// Child role names.
    pub child_roles: Vec<String>,
    /// Single-valued custom attributes.
    pub custom: BTreeMap<String, String>,
    /// Write counter.
    pub version: u64,
}

impl RoleAttributes {
    /// Decode from a provider bag.
    pub fn from_bag(bag: &AttributeBag) -> AuthzResult<Self> {
        let custom = bag
            .iter()
            .filter(|(k, _)| !is_reserved_key(k))
            .filter_map(|(k, v)| v.first().map(|first| (k.clone(), first.clone())))
            .collect();

        Ok(Self {
            permissions: bag.get(PERMISSIONS_KEY).cloned().unwrap_or_default(),
            composite: bag
                .get(COMPOSITE_KEY)
                .and_then(|v| v.first())
                .map(|v| v == "true")
                .unwrap_or(false),
            child_roles: bag.get(CHILD_ROLES_KEY).cloned().unwrap_or_default(),
            custom,
            version: read_version(bag)?,
        })
    }

    /// Encode into a provider bag.
    pub fn into_bag(self) -> AttributeBag {
        let mut bag: AttributeBag = self
            .custom
            .into_iter()
            .map(|(k, v)| (k, vec![v]))
            .collect();
        bag.insert(PERMISSIONS_KEY.to_string(), self.permissions);
        bag.insert(COMPOSITE_KEY.to_string(), vec![self.composite.to_string()]);
        bag.insert(CHILD_ROLES_KEY.to_string(), self.child_roles);
        write_version(&mut bag, self.version);
        bag
    }
}

/// Structured user data kept in the user's attribute bag.
///
/// Attributes the engine does not own are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttributes {
    /// Permission names granted directly to the user.
    pub direct_permissions: Vec<String>,
    /// Attributes owned by other parts of the system.
    pub passthrough: AttributeBag,
    /// Write counter.
    pub version: u64,
}

impl UserAttributes {
    /// Decode from a provider bag.
    pub fn from_bag(bag: &AttributeBag) -> AuthzResult<Self> {
        let passthrough = bag
            .iter()
            .filter(|(k, _)| !is_reserved_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            direct_permissions: bag.get(DIRECT_PERMISSIONS_KEY).cloned().unwrap_or_default(),
            passthrough,
            version: read_version(bag)?,
        })
    }

    /// Encode into a provider bag.
    pub fn into_bag(self) -> AttributeBag {
        let mut bag = self.passthrough;
        bag.insert(DIRECT_PERMISSIONS_KEY.to_string(), self.direct_permissions);
        write_version(&mut bag, self.version);
        bag
    }
}
