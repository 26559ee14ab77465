//! End-to-end tests for the authorization engine.
//!
//! The engine runs over the in-memory catalog store, identity provider and
//! event bus. Tests cover:
//! 1. Resource registration and permission generation
//! 2. Permission naming and deletion rules
//! 3. Effective permission resolution through composite roles
//! 4. Guard decisions
//! 5. Startup seeding
//! 6. Cache convergence between two engine instances

use gatehouse_engine::{
    AuthorizationEngine, CatalogStore, EngineConfig, MemoryCatalogStore, MemoryIdentityProvider,
};
use gatehouse_events::{EventBus, MemoryEventBus};
use gatehouse_model::{
    AuthzError, NewPermission, NewResource, NewRole, PermissionName, Principal, ResourcePatch,
};
use std::sync::Arc;
use std::time::Duration;

/// Engine over fresh in-memory collaborators.
struct TestFixture {
    engine: AuthorizationEngine,
    identity: Arc<MemoryIdentityProvider>,
}

impl TestFixture {
    async fn new() -> Self {
        let identity = Arc::new(MemoryIdentityProvider::new());
        let engine = AuthorizationEngine::new(
            EngineConfig::default(),
            Arc::new(MemoryCatalogStore::new()),
            identity.clone(),
            None,
        )
        .unwrap();
        engine.bootstrap().await.unwrap();

        Self { engine, identity }
    }

    async fn permission(&self, name: &str) {
        let parsed = PermissionName::parse(name).unwrap();
        self.engine
            .catalog()
            .create(NewPermission {
                name: name.to_string(),
                description: format!("Grants {}", name),
                resource: parsed.resource().to_string(),
                action: parsed.action().to_string(),
                scope: parsed.scope().map(str::to_string),
                category: None,
            })
            .await
            .unwrap();
    }
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn names_of(permissions: &[gatehouse_model::Permission]) -> Vec<String> {
    permissions.iter().map(|p| p.name.clone()).collect()
}

// =============================================================================
// Resources
// =============================================================================

#[tokio::test]
async fn test_resource_generates_one_permission_per_action() {
    let fixture = TestFixture::new().await;
    let registry = fixture.engine.registry();
    let catalog = fixture.engine.catalog();

    registry
        .create(NewResource::new(
            "documents",
            "Company documents",
            ["read", "approve", "archive"],
        ))
        .await
        .unwrap();

    assert_eq!(
        names_of(&catalog.list_by_resource("documents").await),
        vec!["documents:approve", "documents:archive", "documents:read"]
    );
}

#[tokio::test]
async fn test_resource_keeps_existing_permissions() {
    let fixture = TestFixture::new().await;
    fixture.permission("invoices:read:own").await;
    let existing = fixture
        .engine
        .catalog()
        .find_by_name("invoices:read:own")
        .await
        .unwrap();

    fixture
        .engine
        .registry()
        .create(NewResource::new("invoices", "Invoices", ["read", "pay"]).with_default_scope("own"))
        .await
        .unwrap();

    let generated = fixture.engine.catalog().list_by_resource("invoices").await;
    assert_eq!(names_of(&generated), vec!["invoices:pay:own", "invoices:read:own"]);
    let kept = generated
        .iter()
        .find(|p| p.name == "invoices:read:own")
        .unwrap();
    assert_eq!(kept.id, existing.id);
}

#[tokio::test]
async fn test_duplicate_resource_is_conflict() {
    let fixture = TestFixture::new().await;
    let request = NewResource::new("documents", "Company documents", ["read"]);

    fixture.engine.registry().create(request.clone()).await.unwrap();
    assert!(matches!(
        fixture.engine.registry().create(request).await,
        Err(AuthzError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_resource_update_regenerates_permissions() {
    let fixture = TestFixture::new().await;
    let resource = fixture
        .engine
        .registry()
        .create(NewResource::new("documents", "Company documents", ["read", "approve"]))
        .await
        .unwrap();

    fixture
        .engine
        .registry()
        .update(
            resource.id,
            ResourcePatch {
                actions: Some(strings(&["read", "sign"])),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        names_of(&fixture.engine.catalog().list_by_resource("documents").await),
        vec!["documents:read", "documents:sign"]
    );
}

#[tokio::test]
async fn test_deleting_resource_removes_its_permissions() {
    let fixture = TestFixture::new().await;
    let resource = fixture
        .engine
        .registry()
        .create(NewResource::new("documents", "Company documents", ["read", "approve"]))
        .await
        .unwrap();

    fixture.engine.registry().delete(resource.id).await.unwrap();

    assert!(fixture
        .engine
        .catalog()
        .list_by_resource("documents")
        .await
        .is_empty());
    assert!(fixture
        .engine
        .registry()
        .find_by_name("documents")
        .await
        .is_none());
}

#[tokio::test]
async fn test_system_resource_cannot_be_deleted() {
    let fixture = TestFixture::new().await;
    let users = fixture
        .engine
        .registry()
        .find_by_name("users")
        .await
        .unwrap();
    let before = fixture.engine.catalog().list_by_resource("users").await;

    let result = fixture.engine.registry().delete(users.id).await;
    assert!(matches!(result, Err(AuthzError::InvalidArgument(_))));

    let after = fixture.engine.catalog().list_by_resource("users").await;
    assert_eq!(names_of(&before), names_of(&after));
    assert!(fixture.engine.registry().find_by_name("users").await.is_some());
}

// =============================================================================
// Permissions
// =============================================================================

#[tokio::test]
async fn test_permission_name_validation() {
    let fixture = TestFixture::new().await;

    for bad in ["bad name", "Documents:read", "documentsread"] {
        let result = fixture
            .engine
            .catalog()
            .create(NewPermission {
                name: bad.to_string(),
                description: String::new(),
                resource: "documents".to_string(),
                action: "read".to_string(),
                scope: None,
                category: None,
            })
            .await;
        assert!(
            matches!(result, Err(AuthzError::InvalidArgument(_))),
            "{} should be rejected",
            bad
        );
    }

    fixture.permission("documents:read").await;
    fixture.permission("documents:read:own").await;
    assert!(fixture.engine.catalog().exists("documents:read").await);
    assert!(fixture.engine.catalog().exists("documents:read:own").await);
}

#[tokio::test]
async fn test_referenced_permission_cannot_be_deleted() {
    let fixture = TestFixture::new().await;
    fixture.permission("reports:export").await;
    fixture
        .engine
        .roles()
        .create(NewRole::new(
            "analyst",
            "Exports reports",
            strings(&["reports:export"]),
        ))
        .await
        .unwrap();
    let permission = fixture
        .engine
        .catalog()
        .find_by_name("reports:export")
        .await
        .unwrap();

    let result = fixture.engine.catalog().delete(permission.id).await;
    match result {
        Err(AuthzError::InvalidArgument(message)) => assert!(message.contains("analyst")),
        other => panic!("expected invalid argument, got {:?}", other),
    }

    fixture
        .engine
        .roles()
        .remove_permission("analyst", "reports:export")
        .await
        .unwrap();
    fixture.engine.catalog().delete(permission.id).await.unwrap();
    assert!(!fixture.engine.catalog().exists("reports:export").await);
}

// =============================================================================
// Resolution and guard
// =============================================================================

#[tokio::test]
async fn test_effective_permissions_through_composite_role() {
    let fixture = TestFixture::new().await;
    for name in ["a:read", "b:read", "c:read"] {
        fixture.permission(name).await;
    }
    let roles = fixture.engine.roles();
    roles
        .create(NewRole::new("r2", "", strings(&["c:read"])))
        .await
        .unwrap();
    roles
        .create(NewRole::new("r1", "", strings(&["b:read", "c:read"])).with_children(strings(&["r2"])))
        .await
        .unwrap();

    fixture.identity.add_user("u1", "alice").await;
    roles.assign_to_user("u1", &strings(&["r1"])).await.unwrap();
    fixture
        .engine
        .resolver()
        .assign_direct("u1", &strings(&["a:read"]))
        .await
        .unwrap();

    let state = fixture.engine.resolver().resolve_for_user("u1").await.unwrap();
    assert_eq!(
        state.effective_permissions.to_sorted_vec(),
        vec!["a:read", "b:read", "c:read"]
    );
    assert_eq!(state.roles, vec!["r1"]);
}

#[tokio::test]
async fn test_guard_requires_every_permission() {
    let fixture = TestFixture::new().await;
    fixture.permission("p:one").await;
    fixture.permission("p:two").await;
    fixture.identity.add_user("u1", "alice").await;
    fixture
        .engine
        .resolver()
        .assign_direct("u1", &strings(&["p:one"]))
        .await
        .unwrap();

    let alice = Principal::new("u1", "alice");
    let guard = fixture.engine.guard();
    assert!(!guard
        .evaluate(Some(&alice), &["p:one", "p:two"])
        .await
        .is_allowed());
    assert!(matches!(
        guard.authorize(Some(&alice), &["p:one", "p:two"]).await,
        Err(AuthzError::Forbidden(_))
    ));

    fixture
        .engine
        .resolver()
        .assign_direct("u1", &strings(&["p:two"]))
        .await
        .unwrap();
    assert!(guard
        .evaluate(Some(&alice), &["p:one", "p:two"])
        .await
        .is_allowed());
}

#[tokio::test]
async fn test_seeded_user_role_grants_own_profile() {
    let fixture = TestFixture::new().await;
    fixture.identity.add_user("u1", "alice").await;
    fixture
        .engine
        .roles()
        .assign_to_user("u1", &strings(&["user"]))
        .await
        .unwrap();

    let alice = Principal::new("u1", "alice");
    let guard = fixture.engine.guard();
    assert!(guard
        .evaluate(Some(&alice), &["profile:read:own", "files:upload:own"])
        .await
        .is_allowed());
    assert!(!guard
        .evaluate(Some(&alice), &["users:delete"])
        .await
        .is_allowed());
}

// =============================================================================
// Seeding
// =============================================================================

#[tokio::test]
async fn test_seeding_twice_creates_no_duplicates() {
    let fixture = TestFixture::new().await;
    let resources = fixture.engine.registry().list().await.len();
    let permissions = names_of(&fixture.engine.catalog().list().await);

    assert_eq!(
        fixture.engine.registry().seed_system_resources().await.unwrap(),
        0
    );
    fixture
        .engine
        .catalog()
        .seed_system_permissions()
        .await
        .unwrap();
    fixture.engine.bootstrap().await.unwrap();

    assert_eq!(fixture.engine.registry().list().await.len(), resources);
    let after = names_of(&fixture.engine.catalog().list().await);
    assert_eq!(after, permissions);

    let mut unique = after.clone();
    unique.dedup();
    assert_eq!(unique.len(), after.len());
}

// =============================================================================
// Cross-instance convergence
// =============================================================================

async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_catalog_changes_reach_other_instances() {
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
    let identity = Arc::new(MemoryIdentityProvider::new());
    let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new());

    let instance = |id: &str| {
        AuthorizationEngine::new(
            EngineConfig {
                instance_id: id.to_string(),
                ..Default::default()
            },
            store.clone(),
            identity.clone(),
            Some(bus.clone()),
        )
        .unwrap()
    };
    let a = instance("instance-a");
    let b = instance("instance-b");
    a.bootstrap().await.unwrap();
    b.bootstrap().await.unwrap();
    assert!(b.start_sync().await.unwrap());
    let b = &b;

    let resource = a
        .registry()
        .create(NewResource::new("invoices", "Invoices", ["approve"]))
        .await
        .unwrap();
    assert!(
        wait_for(move || async move { b.catalog().exists("invoices:approve").await }).await,
        "instance b never saw the new permission"
    );
    assert!(b.registry().find_by_name("invoices").await.is_some());

    a.registry().delete(resource.id).await.unwrap();
    assert!(
        wait_for(move || async move { !b.catalog().exists("invoices:approve").await }).await,
        "instance b never saw the deletion"
    );
    assert!(b.registry().find_by_name("invoices").await.is_none());
}
