//! Event types for catalog change notifications
//!
//! This module defines the envelope and the typed events published whenever
//! resources, permissions, roles or user grants change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Topic prefix shared by every gatehouse event.
pub const TOPIC_PREFIX: &str = "gatehouse";

/// Event envelope.
///
/// All events are wrapped in this envelope which provides metadata
/// for routing, tracing, and processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,

    /// Event type (e.g., "resource.created", "role.updated")
    pub event_type: String,

    /// Instance that published the event
    pub source: String,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// User who triggered the change
    pub actor: Option<String>,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// Event version for schema evolution
    pub version: u32,

    /// Event payload
    pub payload: serde_json::Value,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Create a new event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The event type string
    /// * `source` - The publishing instance id
    /// * `payload` - The event payload
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            actor: None,
            correlation_id: None,
            version: 1,
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Set the acting user.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get the topic for this event.
    ///
    /// Topics are structured as: `gatehouse.{event_type}`
    pub fn topic(&self) -> String {
        format!("{}.{}", TOPIC_PREFIX, self.event_type)
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Event categories for filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Resource registry changes
    Resource,
    /// Permission catalog changes
    Permission,
    /// Role changes
    Role,
    /// User grant and role-mapping changes
    User,
}

impl EventCategory {
    /// Parse from event type string.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type.split('.').next()? {
            "resource" => Some(EventCategory::Resource),
            "permission" => Some(EventCategory::Permission),
            "role" => Some(EventCategory::Role),
            "user" => Some(EventCategory::User),
            _ => None,
        }
    }

    /// Whether events of this category invalidate the cached catalogs.
    pub fn affects_catalog(&self) -> bool {
        matches!(self, EventCategory::Resource | EventCategory::Permission)
    }
}

/// Changes to resources, permissions, roles and user grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogEvent {
    /// Resource registered
    ResourceCreated {
        resource_id: Uuid,
        name: String,
        generated_permissions: Vec<String>,
    },
    /// Resource updated
    ResourceUpdated {
        resource_id: Uuid,
        name: String,
        regenerated: bool,
    },
    /// Resource deleted along with its permissions
    ResourceDeleted {
        resource_id: Uuid,
        name: String,
        removed_permissions: Vec<String>,
    },
    /// Permission created
    PermissionCreated { permission_id: Uuid, name: String },
    /// Permission updated
    PermissionUpdated { permission_id: Uuid, name: String },
    /// Permission deleted
    PermissionDeleted { permission_id: Uuid, name: String },
    /// Role created
    RoleCreated { name: String },
    /// Role updated
    RoleUpdated { name: String },
    /// Role deleted
    RoleDeleted { name: String },
    /// Direct permissions granted to a user
    UserPermissionsAssigned {
        user_id: String,
        permissions: Vec<String>,
    },
    /// Direct permissions revoked from a user
    UserPermissionsRevoked {
        user_id: String,
        permissions: Vec<String>,
    },
    /// Roles mapped to a user
    UserRolesAssigned { user_id: String, roles: Vec<String> },
    /// Roles unmapped from a user
    UserRolesRemoved { user_id: String, roles: Vec<String> },
}

impl CatalogEvent {
    /// Event type string used for the topic.
    pub fn event_type(&self) -> &'static str {
        match self {
            CatalogEvent::ResourceCreated { .. } => "resource.created",
            CatalogEvent::ResourceUpdated { .. } => "resource.updated",
            CatalogEvent::ResourceDeleted { .. } => "resource.deleted",
            CatalogEvent::PermissionCreated { .. } => "permission.created",
            CatalogEvent::PermissionUpdated { .. } => "permission.updated",
            CatalogEvent::PermissionDeleted { .. } => "permission.deleted",
            CatalogEvent::RoleCreated { .. } => "role.created",
            CatalogEvent::RoleUpdated { .. } => "role.updated",
            CatalogEvent::RoleDeleted { .. } => "role.deleted",
            CatalogEvent::UserPermissionsAssigned { .. } => "user.permissions_assigned",
            CatalogEvent::UserPermissionsRevoked { .. } => "user.permissions_revoked",
            CatalogEvent::UserRolesAssigned { .. } => "user.roles_assigned",
            CatalogEvent::UserRolesRemoved { .. } => "user.roles_removed",
        }
    }

    /// Category of this event.
    pub fn category(&self) -> EventCategory {
        match self {
            CatalogEvent::ResourceCreated { .. }
            | CatalogEvent::ResourceUpdated { .. }
            | CatalogEvent::ResourceDeleted { .. } => EventCategory::Resource,
            CatalogEvent::PermissionCreated { .. }
            | CatalogEvent::PermissionUpdated { .. }
            | CatalogEvent::PermissionDeleted { .. } => EventCategory::Permission,
            CatalogEvent::RoleCreated { .. }
            | CatalogEvent::RoleUpdated { .. }
            | CatalogEvent::RoleDeleted { .. } => EventCategory::Role,
            CatalogEvent::UserPermissionsAssigned { .. }
            | CatalogEvent::UserPermissionsRevoked { .. }
            | CatalogEvent::UserRolesAssigned { .. }
            | CatalogEvent::UserRolesRemoved { .. } => EventCategory::User,
        }
    }

    /// Convert to generic event.
    pub fn to_event(&self, source: &str) -> Event {
        Event::new(
            self.event_type(),
            source,
            serde_json::to_value(self).unwrap_or_default(),
        )
    }

    /// Recover the typed event from an envelope.
    pub fn from_event(event: &Event) -> Option<Self> {
        event.parse_payload().ok()
    }
}
