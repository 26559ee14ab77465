//! The assembled authorization engine.

use gatehouse_events::EventBus;
use gatehouse_model::{AuthzError, AuthzResult};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::catalog::{PermissionCatalog, SeedOutcome};
use crate::config::EngineConfig;
use crate::guard::AuthorizationGuard;
use crate::identity::{HttpIdentityProvider, IdentityProvider};
use crate::registry::ResourceRegistry;
use crate::resolver::EffectivePermissionResolver;
use crate::roles::{RoleStore, RoleStoreOptions};
use crate::store::CatalogStore;
use crate::sync::{CatalogSync, EventPublisher};

/// What `bootstrap` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Whether system entities were seeded.
    pub seeded: bool,
    /// System resources created.
    pub resources_created: usize,
    /// Outcome of system permission seeding.
    pub permissions: Option<SeedOutcome>,
    /// System roles created.
    pub roles_created: usize,
    /// Resources in the cache afterwards.
    pub resources_loaded: usize,
    /// Permissions in the cache afterwards.
    pub permissions_loaded: usize,
}

/// Every authorization service wired over one store, one identity provider
/// and an optional event bus.
pub struct AuthorizationEngine {
    config: EngineConfig,
    bus: Option<Arc<dyn EventBus>>,
    registry: Arc<ResourceRegistry>,
    catalog: Arc<PermissionCatalog>,
    roles: Arc<RoleStore>,
    resolver: Arc<EffectivePermissionResolver>,
    guard: AuthorizationGuard,
}

impl AuthorizationEngine {
    /// Build an engine. Caches start empty; call [`bootstrap`](Self::bootstrap).
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn CatalogStore>,
        identity: Arc<dyn IdentityProvider>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> AuthzResult<Self> {
        config.validate()?;

        let events = EventPublisher::new(bus.clone(), config.instance_id.clone());
        let catalog = Arc::new(PermissionCatalog::new(
            store.clone(),
            identity.clone(),
            events.clone(),
        ));
        let registry = Arc::new(ResourceRegistry::new(
            store,
            catalog.clone(),
            events.clone(),
        ));
        let roles = Arc::new(RoleStore::new(
            identity.clone(),
            catalog.clone(),
            events.clone(),
            RoleStoreOptions {
                strict_permissions: config.strict_role_permissions,
                protected_roles: config.protected_roles.clone(),
                retry: config.write_retry(),
            },
        ));
        let resolver = Arc::new(EffectivePermissionResolver::new(
            identity,
            catalog.clone(),
            events,
            config.max_role_depth,
            config.write_retry(),
        ));
        let guard = AuthorizationGuard::new(resolver.clone());

        info!(instance_id = %config.instance_id, events = bus.is_some(), "Authorization engine created");
        Ok(Self {
            config,
            bus,
            registry,
            catalog,
            roles,
            resolver,
            guard,
        })
    }

    /// Build an engine against the configured HTTP identity provider.
    pub fn connect(
        config: EngineConfig,
        store: Arc<dyn CatalogStore>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> AuthzResult<Self> {
        config.identity_provider.validate()?;
        let identity = Arc::new(HttpIdentityProvider::new(config.identity_provider.clone())?);
        Self::new(config, store, identity, bus)
    }

    /// Seed system entities when enabled, then load the caches.
    ///
    /// Seeding failures are logged and do not stop startup; the permission
    /// catalog falls back to an in-memory seed. Without seeding, cache load
    /// failures are returned.
    #[instrument(skip(self), fields(instance_id = %self.config.instance_id))]
    pub async fn bootstrap(&self) -> AuthzResult<BootstrapReport> {
        let mut report = BootstrapReport {
            seeded: self.config.seed_on_startup,
            resources_created: 0,
            permissions: None,
            roles_created: 0,
            resources_loaded: 0,
            permissions_loaded: 0,
        };

        if self.config.seed_on_startup {
            match self.registry.seed_system_resources().await {
                Ok(created) => report.resources_created = created,
                Err(e) => warn!(error = %e, "Seeding system resources failed"),
            }
            report.permissions = Some(self.catalog.seed_system_permissions().await?);
            match self.roles.seed_system_roles().await {
                Ok(created) => report.roles_created = created,
                Err(e) => warn!(error = %e, "Seeding system roles failed"),
            }
        } else {
            self.registry.reload().await?;
            self.catalog.reload().await?;
        }

        report.resources_loaded = self.registry.list().await.len();
        report.permissions_loaded = self.catalog.list().await.len();
        info!(
            resources = report.resources_loaded,
            permissions = report.permissions_loaded,
            "Authorization engine bootstrapped"
        );
        Ok(report)
    }

    /// Reload caches when other instances change the catalog. Returns false
    /// when the engine has no event bus.
    pub async fn start_sync(&self) -> AuthzResult<bool> {
        let Some(ref bus) = self.bus else {
            return Ok(false);
        };

        CatalogSync::new(
            self.config.instance_id.clone(),
            self.registry.clone(),
            self.catalog.clone(),
        )
        .attach(bus.as_ref())
        .await
        .map_err(|e| AuthzError::Internal(format!("catalog sync: {}", e)))?;

        info!(instance_id = %self.config.instance_id, "Catalog sync started");
        Ok(true)
    }

    /// The validated configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resource registry.
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Permission catalog.
    pub fn catalog(&self) -> &Arc<PermissionCatalog> {
        &self.catalog
    }

    /// Role store.
    pub fn roles(&self) -> &Arc<RoleStore> {
        &self.roles
    }

    /// Effective permission resolver.
    pub fn resolver(&self) -> &Arc<EffectivePermissionResolver> {
        &self.resolver
    }

    /// Request guard over the resolver.
    pub fn guard(&self) -> &AuthorizationGuard {
        &self.guard
    }
}
