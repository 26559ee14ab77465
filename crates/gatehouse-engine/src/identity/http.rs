//! Keycloak-compatible identity provider client.
//!
//! HTTP client for the admin REST API. Roles are realm roles, composites are
//! native composite links and user roles are realm role mappings. Engine data
//! lives in the role and user `attributes` maps.

use async_trait::async_trait;
use gatehouse_model::attributes::write_version;
use gatehouse_model::{AttributeBag, AuthzError, AuthzResult};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use super::{next_version, IdentityProvider, ProviderRole, ProviderUser};
use crate::config::{ConfigError, IdentityProviderConfig};

/// Identity provider client errors.
#[derive(Debug, Error)]
pub enum HttpProviderError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Entity already exists.
    #[error("{0} already exists")]
    Conflict(String),

    /// Authentication failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Name or id that cannot be used as a path segment.
    #[error("'{0}' is not a valid path segment")]
    InvalidPath(String),

    /// Unusable endpoint configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<HttpProviderError> for AuthzError {
    fn from(err: HttpProviderError) -> Self {
        match err {
            HttpProviderError::NotFound(what) => AuthzError::NotFound(what),
            HttpProviderError::Conflict(what) => {
                AuthzError::Conflict(format!("{} already exists", what))
            }
            HttpProviderError::InvalidPath(segment) => AuthzError::InvalidArgument(format!(
                "'{}' is not a valid role name or user id",
                segment
            )),
            HttpProviderError::Config(e) => e.into(),
            other => AuthzError::Provider(other.to_string()),
        }
    }
}

/// Role as represented by the admin API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    composite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<AttributeBag>,
}

impl From<RoleRepresentation> for ProviderRole {
    fn from(rep: RoleRepresentation) -> Self {
        Self {
            id: rep.id.unwrap_or_default(),
            name: rep.name,
            description: rep.description.unwrap_or_default(),
            composite: rep.composite,
            attributes: rep.attributes.unwrap_or_default(),
        }
    }
}

/// User as represented by the admin API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<AttributeBag>,
}

impl From<UserRepresentation> for ProviderUser {
    fn from(rep: UserRepresentation) -> Self {
        Self {
            id: rep.id.unwrap_or_default(),
            username: rep.username.unwrap_or_default(),
            enabled: rep.enabled.unwrap_or(true),
            attributes: rep.attributes.unwrap_or_default(),
        }
    }
}

/// Identity provider backed by a Keycloak-compatible admin REST API.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    /// HTTP client instance.
    client: Client,

    /// Endpoint configuration.
    config: IdentityProviderConfig,
}

impl std::fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("base_url", &self.config.base_url)
            .field("realm", &self.config.realm)
            .finish()
    }
}

impl HttpIdentityProvider {
    /// Create a new client.
    pub fn new(config: IdentityProviderConfig) -> AuthzResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AuthzError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<RequestBuilder, HttpProviderError> {
        if let Some(bad) = segments
            .iter()
            .find(|s| s.is_empty() || **s == "." || **s == "..")
        {
            return Err(HttpProviderError::InvalidPath(bad.to_string()));
        }

        let url = self.config.admin_url(segments)?;
        let mut request = self.client.request(method, url);
        if let Some(ref token) = self.config.admin_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        Ok(request)
    }

    async fn check(
        &self,
        response: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, HttpProviderError> {
        let status = response.status();

        match status {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(HttpProviderError::NotFound(what.to_string())),
            StatusCode::CONFLICT => Err(HttpProviderError::Conflict(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("Identity provider authentication failed");
                Err(HttpProviderError::AuthenticationFailed)
            }
            _ => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                warn!("Identity provider API error ({}): {}", status.as_u16(), message);
                Err(HttpProviderError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, HttpProviderError> {
        let response = self.check(request.send().await?, what).await?;
        response
            .json()
            .await
            .map_err(|e| HttpProviderError::InvalidResponse(e.to_string()))
    }

    async fn execute(&self, request: RequestBuilder, what: &str) -> Result<(), HttpProviderError> {
        self.check(request.send().await?, what).await?;
        Ok(())
    }

    async fn role_representation(&self, name: &str) -> Result<RoleRepresentation, HttpProviderError> {
        self.fetch(
            self.request(Method::GET, &["roles", name])?,
            &format!("role '{}'", name),
        )
        .await
    }

    /// Minimal `{id, name}` representations the mapping endpoints expect.
    async fn role_references(
        &self,
        names: &[String],
    ) -> Result<Vec<RoleRepresentation>, HttpProviderError> {
        let mut refs = Vec::with_capacity(names.len());
        for name in names {
            let rep = self.role_representation(name).await?;
            refs.push(RoleRepresentation {
                id: rep.id,
                name: rep.name,
                ..Default::default()
            });
        }
        Ok(refs)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self))]
    async fn get_role_by_name(&self, name: &str) -> AuthzResult<ProviderRole> {
        debug!("Fetching role {}", name);
        Ok(self.role_representation(name).await?.into())
    }

    #[instrument(skip(self))]
    async fn list_roles(&self) -> AuthzResult<Vec<ProviderRole>> {
        let reps: Vec<RoleRepresentation> = self
            .fetch(
                self.request(Method::GET, &["roles"])?
                    .query(&[("briefRepresentation", "false")]),
                "roles",
            )
            .await?;
        Ok(reps.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, attributes))]
    async fn create_role(
        &self,
        name: &str,
        description: &str,
        attributes: AttributeBag,
    ) -> AuthzResult<ProviderRole> {
        let rep = RoleRepresentation {
            name: name.to_string(),
            description: Some(description.to_string()),
            attributes: Some(attributes),
            ..Default::default()
        };
        self.execute(
            self.request(Method::POST, &["roles"])?.json(&rep),
            &format!("role '{}'", name),
        )
        .await?;

        // The create endpoint returns no body
        self.get_role_by_name(name).await
    }

    #[instrument(skip(self, attributes))]
    async fn update_role(
        &self,
        name: &str,
        description: &str,
        mut attributes: AttributeBag,
        expected_version: u64,
    ) -> AuthzResult<ProviderRole> {
        let current = self.role_representation(name).await?;
        let next = next_version(
            &format!("role {}", name),
            current.attributes.as_ref().unwrap_or(&AttributeBag::new()),
            expected_version,
        )?;
        write_version(&mut attributes, next);

        let rep = RoleRepresentation {
            id: current.id,
            name: name.to_string(),
            description: Some(description.to_string()),
            composite: current.composite,
            attributes: Some(attributes),
        };
        self.execute(
            self.request(Method::PUT, &["roles", name])?.json(&rep),
            &format!("role '{}'", name),
        )
        .await?;

        Ok(rep.into())
    }

    #[instrument(skip(self))]
    async fn delete_role(&self, name: &str) -> AuthzResult<()> {
        self.execute(
            self.request(Method::DELETE, &["roles", name])?,
            &format!("role '{}'", name),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_composites(&self, name: &str, children: &[String]) -> AuthzResult<()> {
        let refs = self.role_references(children).await?;
        self.execute(
            self.request(Method::POST, &["roles", name, "composites"])?
                .json(&refs),
            &format!("role '{}'", name),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_composites(&self, name: &str, children: &[String]) -> AuthzResult<()> {
        let refs = self.role_references(children).await?;
        self.execute(
            self.request(Method::DELETE, &["roles", name, "composites"])?
                .json(&refs),
            &format!("role '{}'", name),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn users_with_role(&self, name: &str) -> AuthzResult<Vec<ProviderUser>> {
        let reps: Vec<UserRepresentation> = self
            .fetch(
                self.request(Method::GET, &["roles", name, "users"])?,
                &format!("role '{}'", name),
            )
            .await?;
        Ok(reps.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn get_user(&self, user_id: &str) -> AuthzResult<ProviderUser> {
        let rep: UserRepresentation = self
            .fetch(
                self.request(Method::GET, &["users", user_id])?,
                &format!("user '{}'", user_id),
            )
            .await?;
        Ok(rep.into())
    }

    #[instrument(skip(self, attributes))]
    async fn update_user_attributes(
        &self,
        user_id: &str,
        mut attributes: AttributeBag,
        expected_version: u64,
    ) -> AuthzResult<ProviderUser> {
        let mut user = self.get_user(user_id).await?;
        let next = next_version(
            &format!("user {}", user_id),
            &user.attributes,
            expected_version,
        )?;
        write_version(&mut attributes, next);

        let rep = UserRepresentation {
            attributes: Some(attributes.clone()),
            ..Default::default()
        };
        self.execute(
            self.request(Method::PUT, &["users", user_id])?.json(&rep),
            &format!("user '{}'", user_id),
        )
        .await?;

        user.attributes = attributes;
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn get_user_roles(&self, user_id: &str) -> AuthzResult<Vec<String>> {
        let reps: Vec<RoleRepresentation> = self
            .fetch(
                self.request(
                    Method::GET,
                    &["users", user_id, "role-mappings", "realm"],
                )?,
                &format!("user '{}'", user_id),
            )
            .await?;
        Ok(reps.into_iter().map(|r| r.name).collect())
    }

    #[instrument(skip(self))]
    async fn assign_roles_to_user(&self, user_id: &str, roles: &[String]) -> AuthzResult<()> {
        let refs = self.role_references(roles).await?;
        self.execute(
            self.request(
                Method::POST,
                &["users", user_id, "role-mappings", "realm"],
            )?
            .json(&refs),
            &format!("user '{}'", user_id),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_roles_from_user(&self, user_id: &str, roles: &[String]) -> AuthzResult<()> {
        let refs = self.role_references(roles).await?;
        self.execute(
            self.request(
                Method::DELETE,
                &["users", user_id, "role-mappings", "realm"],
            )?
            .json(&refs),
            &format!("user '{}'", user_id),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: AuthzError = HttpProviderError::NotFound("role 'x'".into()).into();
        assert!(matches!(err, AuthzError::NotFound(_)));

        let err: AuthzError = HttpProviderError::Conflict("role 'x'".into()).into();
        assert!(matches!(err, AuthzError::Conflict(_)));

        let err: AuthzError = HttpProviderError::ApiError {
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert_eq!(err.status_code(), 502);

        let err: AuthzError = HttpProviderError::InvalidPath("..".into()).into();
        assert!(matches!(err, AuthzError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_dot_segments_are_rejected_before_sending() {
        let idp = HttpIdentityProvider::new(IdentityProviderConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            realm: "test".to_string(),
            admin_token: Some("t".to_string()),
            timeout_secs: 1,
        })
        .unwrap();

        for id in ["..", ".", ""] {
            assert!(matches!(
                idp.get_user(id).await,
                Err(AuthzError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_role_representation_defaults() {
        let rep: RoleRepresentation =
            serde_json::from_str(r#"{"id":"1","name":"auditor"}"#).unwrap();
        let role: ProviderRole = rep.into();
        assert_eq!(role.name, "auditor");
        assert!(role.attributes.is_empty());
        assert!(!role.composite);
    }
}
