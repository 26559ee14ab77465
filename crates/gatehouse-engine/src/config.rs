//! Engine configuration.
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for a single local instance.

use gatehouse_model::AuthzError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::retry::RetryConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

impl From<ConfigError> for AuthzError {
    fn from(err: ConfigError) -> Self {
        AuthzError::ConfigError(err.to_string())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Authorization engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identifies this process on the event bus.
    pub instance_id: String,

    /// Seed system resources, permissions and roles during bootstrap.
    pub seed_on_startup: bool,

    /// Require catalog existence for role permissions on create and update.
    pub strict_role_permissions: bool,

    /// Role names treated as system roles besides the built-in set.
    pub protected_roles: Vec<String>,

    /// Maximum composite nesting followed during resolution.
    pub max_role_depth: usize,

    /// Attempts for read-modify-write sequences that hit a version conflict.
    pub write_retries: u32,

    /// Identity provider endpoint.
    pub identity_provider: IdentityProviderConfig,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_id: Uuid::now_v7().to_string(),
            seed_on_startup: true,
            strict_role_permissions: true,
            protected_roles: Vec::new(),
            max_role_depth: 32,
            write_retries: 3,
            identity_provider: IdentityProviderConfig::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `GATEHOUSE_INSTANCE_ID`: Instance id (default: random UUID v7)
    /// - `GATEHOUSE_SEED_ON_STARTUP`: Seed system entities (default: true)
    /// - `GATEHOUSE_STRICT_ROLE_PERMISSIONS`: Existence-check role permissions (default: true)
    /// - `GATEHOUSE_PROTECTED_ROLES`: Comma separated extra system roles (default: empty)
    /// - `GATEHOUSE_MAX_ROLE_DEPTH`: Composite nesting ceiling (default: 32)
    /// - `GATEHOUSE_WRITE_RETRIES`: Version conflict retry attempts (default: 3)
    /// - `IDP_BASE_URL`: Identity provider URL (default: http://localhost:8080)
    /// - `IDP_REALM`: Identity provider realm (default: master)
    /// - `IDP_ADMIN_TOKEN`: Bearer token for the admin API
    /// - `IDP_TIMEOUT_SECS`: Request timeout in seconds (default: 10)
    /// - `LOG_FORMAT`: `json` or `pretty` (default: pretty)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            instance_id: std::env::var("GATEHOUSE_INSTANCE_ID")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(default.instance_id),
            seed_on_startup: env_flag("GATEHOUSE_SEED_ON_STARTUP", default.seed_on_startup),
            strict_role_permissions: env_flag(
                "GATEHOUSE_STRICT_ROLE_PERMISSIONS",
                default.strict_role_permissions,
            ),
            protected_roles: std::env::var("GATEHOUSE_PROTECTED_ROLES")
                .map(|s| parse_list(&s))
                .unwrap_or(default.protected_roles),
            max_role_depth: std::env::var("GATEHOUSE_MAX_ROLE_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.max_role_depth),
            write_retries: std::env::var("GATEHOUSE_WRITE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.write_retries),
            identity_provider: IdentityProviderConfig::from_env(),
            log_format: std::env::var("LOG_FORMAT")
                .ok()
                .and_then(|s| LogFormat::parse(&s))
                .unwrap_or(default.log_format),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "GATEHOUSE_INSTANCE_ID".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.max_role_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GATEHOUSE_MAX_ROLE_DEPTH".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.write_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GATEHOUSE_WRITE_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(role) = self.protected_roles.iter().find(|r| r.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "GATEHOUSE_PROTECTED_ROLES".to_string(),
                message: format!("blank role name '{}'", role),
            });
        }
        Ok(())
    }

    /// Retry policy for versioned attribute writes.
    pub fn write_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.write_retries,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
            exponential_base: 2.0,
        }
    }
}

/// Identity provider admin API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    /// Base URL (e.g., "https://sso.example.com").
    pub base_url: String,

    /// Realm holding the roles and users.
    pub realm: String,

    /// Bearer token for the admin API.
    pub admin_token: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            realm: "master".to_string(),
            admin_token: None,
            timeout_secs: 10,
        }
    }
}

impl IdentityProviderConfig {
    /// Load from `IDP_*` environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            base_url: std::env::var("IDP_BASE_URL").unwrap_or(default.base_url),
            realm: std::env::var("IDP_REALM").unwrap_or(default.realm),
            admin_token: std::env::var("IDP_ADMIN_TOKEN").ok(),
            timeout_secs: std::env::var("IDP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.timeout_secs),
        }
    }

    /// Request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build an admin API URL from realm-relative path segments.
    ///
    /// Each segment is percent-encoded as a whole, so `/`, `?` and `#` inside
    /// a role name or user id never change the target path.
    pub fn admin_url(&self, segments: &[&str]) -> Result<Url, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "IDP_BASE_URL".to_string(),
            message,
        };

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| invalid(format!("'{}' is not a valid URL: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| invalid(format!("'{}' cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["admin", "realms", self.realm.as_str()])
            .extend(segments);
        Ok(url)
    }

    /// Validate the endpoint for use by the HTTP provider.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "IDP_BASE_URL".to_string(),
                message: format!("'{}' is not an http(s) URL", self.base_url),
            });
        }
        if self.realm.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("IDP_REALM".to_string()));
        }
        if self.admin_token.is_none() {
            return Err(ConfigError::MissingEnvVar("IDP_ADMIN_TOKEN".to_string()));
        }
        Ok(())
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|s| s != "false" && s != "0")
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
