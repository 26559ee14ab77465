//! Error types for authorization operations
//!
//! This module defines the error taxonomy shared by every catalog, the role
//! store, the resolver and the guard.

use thiserror::Error;

/// Authorization error types.
///
/// Catalog and role operations report `Conflict`, `NotFound` and
/// `InvalidArgument`. The guard collapses every failure into `Forbidden`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    /// An entity with the same name already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown id, name, or permission-on-role
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed name, system entity mutation, or a reference that blocks the operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Request denied by the guard
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A versioned write lost against a concurrent writer
    #[error("Version conflict on {entity}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Entity that was being written.
        entity: String,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Identity provider failure
    #[error("Identity provider error: {0}")]
    Provider(String),

    /// Catalog store failure
    #[error("Catalog store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

impl AuthzError {
    /// Check if this error should be logged at error level.
    ///
    /// Client mistakes (conflicts, validation failures, denials) are expected
    /// and should not be logged as errors.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            AuthzError::Provider(_)
                | AuthzError::Store(_)
                | AuthzError::ConfigError(_)
                | AuthzError::Internal(_)
        )
    }

    /// Whether repeating the read-modify-write sequence may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthzError::VersionConflict { .. })
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthzError::Conflict(_) => 409,
            AuthzError::NotFound(_) => 404,
            AuthzError::InvalidArgument(_) => 400,
            AuthzError::Forbidden(_) => 403,
            AuthzError::VersionConflict { .. } => 409,
            AuthzError::Provider(_) => 502,
            AuthzError::Store(_) => 503,
            AuthzError::ConfigError(_) | AuthzError::Internal(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthzError::Conflict(_) => "CONFLICT",
            AuthzError::NotFound(_) => "NOT_FOUND",
            AuthzError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AuthzError::Forbidden(_) => "FORBIDDEN",
            AuthzError::VersionConflict { .. } => "VERSION_CONFLICT",
            AuthzError::Provider(_) => "PROVIDER_ERROR",
            AuthzError::Store(_) => "STORE_ERROR",
            AuthzError::ConfigError(_) => "CONFIG_ERROR",
            AuthzError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthzError::Conflict("x".into()).status_code(), 409);
        assert_eq!(AuthzError::NotFound("x".into()).status_code(), 404);
        assert_eq!(AuthzError::InvalidArgument("x".into()).status_code(), 400);
        assert_eq!(AuthzError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(AuthzError::Store("down".into()).status_code(), 503);
    }

    #[test]
    fn test_only_version_conflicts_are_retryable() {
        let conflict = AuthzError::VersionConflict {
            entity: "role admin".into(),
            expected: 2,
            actual: 3,
        };
        assert!(conflict.is_retryable());
        assert_eq!(conflict.error_code(), "VERSION_CONFLICT");
        assert!(!AuthzError::Conflict("admin".into()).is_retryable());
        assert!(!AuthzError::Provider("timeout".into()).is_retryable());
    }

    #[test]
    fn test_server_errors() {
        assert!(AuthzError::Provider("x".into()).is_server_error());
        assert!(!AuthzError::Forbidden("x".into()).is_server_error());
    }
}
