//! Permission checks in front of protected operations.

use async_trait::async_trait;
use gatehouse_model::{AuthzError, AuthzResult, Principal};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::resolver::EffectivePermissionResolver;

/// Answers whether a user holds a permission.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Check a single permission.
    async fn has_permission(&self, user_id: &str, permission: &str) -> AuthzResult<bool>;
}

#[async_trait]
impl PermissionChecker for EffectivePermissionResolver {
    async fn has_permission(&self, user_id: &str, permission: &str) -> AuthzResult<bool> {
        EffectivePermissionResolver::has_permission(self, user_id, permission).await
    }
}

/// Outcome of a guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Every required permission is held.
    Allow,
    /// The request is refused.
    Deny {
        /// Why the request was refused.
        reason: String,
    },
}

impl GuardDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    /// Whether the decision is `Allow`.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Requires every listed permission before an operation proceeds.
///
/// Checks run in order and stop at the first failure. A checker error denies
/// the request.
#[derive(Clone)]
pub struct AuthorizationGuard {
    checker: Arc<dyn PermissionChecker>,
}

impl AuthorizationGuard {
    /// Create a guard backed by a permission checker.
    pub fn new(checker: Arc<dyn PermissionChecker>) -> Self {
        Self { checker }
    }

    /// Evaluate the required permissions for a principal.
    pub async fn evaluate<S: AsRef<str>>(
        &self,
        principal: Option<&Principal>,
        required: &[S],
    ) -> GuardDecision {
        if required.is_empty() {
            return GuardDecision::Allow;
        }
        let Some(principal) = principal else {
            return GuardDecision::deny("not authenticated");
        };

        for permission in required {
            let permission = permission.as_ref();
            match self
                .checker
                .has_permission(&principal.user_id, permission)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(user_id = %principal.user_id, permission, "Permission denied");
                    return GuardDecision::deny(format!("missing permission '{}'", permission));
                }
                Err(e) => {
                    warn!(
                        user_id = %principal.user_id,
                        permission,
                        error = %e,
                        "Permission check failed, denying"
                    );
                    return GuardDecision::deny("permission check failed");
                }
            }
        }
        GuardDecision::Allow
    }

    /// Like [`evaluate`](Self::evaluate), but a denial becomes `Forbidden`.
    pub async fn authorize<S: AsRef<str>>(
        &self,
        principal: Option<&Principal>,
        required: &[S],
    ) -> AuthzResult<()> {
        match self.evaluate(principal, required).await {
            GuardDecision::Allow => Ok(()),
            GuardDecision::Deny { reason } => Err(AuthzError::Forbidden(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticChecker {
        granted: HashSet<String>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl StaticChecker {
        fn new(granted: &[&str]) -> Self {
            Self {
                granted: granted.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[])
            }
        }
    }

    #[async_trait]
    impl PermissionChecker for StaticChecker {
        async fn has_permission(&self, _user_id: &str, permission: &str) -> AuthzResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthzError::Provider("connection refused".into()));
            }
            Ok(self.granted.contains(permission))
        }
    }

    fn alice() -> Principal {
        Principal::new("u1", "alice")
    }

    #[tokio::test]
    async fn test_empty_requirement_allows_anonymous() {
        let guard = AuthorizationGuard::new(Arc::new(StaticChecker::new(&[])));
        let none: [&str; 0] = [];
        assert!(guard.evaluate(None, &none).await.is_allowed());
    }

    #[tokio::test]
    async fn test_anonymous_denied() {
        let guard = AuthorizationGuard::new(Arc::new(StaticChecker::new(&["a:read"])));
        assert_eq!(
            guard.evaluate(None, &["a:read"]).await,
            GuardDecision::Deny {
                reason: "not authenticated".into()
            }
        );
    }

    #[tokio::test]
    async fn test_stops_at_first_missing() {
        let checker = Arc::new(StaticChecker::new(&["a:read"]));
        let guard = AuthorizationGuard::new(checker.clone());
        let principal = alice();

        let decision = guard
            .evaluate(Some(&principal), &["a:read", "b:read", "c:read"])
            .await;
        assert_eq!(
            decision,
            GuardDecision::Deny {
                reason: "missing permission 'b:read'".into()
            }
        );
        assert_eq!(checker.calls.load(Ordering::SeqCst), 2);

        assert!(guard
            .evaluate(Some(&principal), &["a:read"])
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_checker_error_denies() {
        let guard = AuthorizationGuard::new(Arc::new(StaticChecker::failing()));
        let principal = alice();

        let decision = guard.evaluate(Some(&principal), &["a:read"]).await;
        assert!(!decision.is_allowed());
        assert!(matches!(
            guard.authorize(Some(&principal), &["a:read"]).await,
            Err(AuthzError::Forbidden(_))
        ));
    }
}
