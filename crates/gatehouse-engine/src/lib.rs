//! # Gatehouse Engine
//!
//! Authorization services over an identity provider and a catalog store.
//!
//! ## Overview
//!
//! The gatehouse-engine crate handles:
//! - **Resources**: `ResourceRegistry` registers resources and generates one
//!   permission per action
//! - **Permissions**: `PermissionCatalog` holds every grantable permission
//! - **Roles**: `RoleStore` keeps roles and user role mappings in the
//!   identity provider
//! - **Resolution**: `EffectivePermissionResolver` computes a user's
//!   effective permission set through composite roles
//! - **Guarding**: `AuthorizationGuard` admits or denies requests
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────┐
//!                │ AuthorizationGuard│
//!                └────────┬─────────┘
//!                         │ has_permission
//!            ┌────────────▼──────────────┐
//!            │EffectivePermissionResolver│
//!            └──────┬─────────────┬──────┘
//!                   │             │
//! ResourceRegistry ─┼─→ PermissionCatalog ←── RoleStore
//!        │          │        │                   │
//!        └──── CatalogStore ─┘        IdentityProvider
//! ```
//!
//! Mutations publish `CatalogEvent`s; `CatalogSync` reloads the caches of
//! other instances.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gatehouse_engine::{
//!     AuthorizationEngine, EngineConfig, MemoryCatalogStore, MemoryIdentityProvider,
//! };
//! use gatehouse_model::Principal;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let identity = Arc::new(MemoryIdentityProvider::new());
//! let engine = AuthorizationEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryCatalogStore::new()),
//!     identity.clone(),
//!     None,
//! )
//! .unwrap();
//! engine.bootstrap().await.unwrap();
//!
//! identity.add_user("u1", "alice").await;
//! engine
//!     .roles()
//!     .assign_to_user("u1", &["user".to_string()])
//!     .await
//!     .unwrap();
//!
//! let alice = Principal::new("u1", "alice");
//! assert!(engine
//!     .guard()
//!     .evaluate(Some(&alice), &["profile:read:own"])
//!     .await
//!     .is_allowed());
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod guard;
pub mod identity;
pub mod index;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod roles;
pub mod store;
pub mod sync;
pub mod telemetry;

// Re-exports
pub use catalog::{PermissionCatalog, SeedOutcome};
pub use config::{ConfigError, EngineConfig, IdentityProviderConfig, LogFormat};
pub use engine::{AuthorizationEngine, BootstrapReport};
pub use guard::{AuthorizationGuard, GuardDecision, PermissionChecker};
pub use identity::{
    HttpIdentityProvider, IdentityProvider, MemoryIdentityProvider, ProviderRole, ProviderUser,
};
pub use index::{CatalogIndex, Indexed};
pub use registry::ResourceRegistry;
pub use resolver::EffectivePermissionResolver;
pub use retry::{retry_on_conflict, with_retry_if, RetryConfig};
pub use roles::{RoleStore, RoleStoreOptions};
pub use store::{CatalogStore, MemoryCatalogStore};
pub use sync::{CatalogSync, EventPublisher, CATALOG_TOPICS};
pub use telemetry::init_tracing;
