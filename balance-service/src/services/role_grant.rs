//! Platform role grants used by `Link`.
//!
//! Grants are best-effort: a failed grant is reported to the caller but never
//! undoes the alias upsert that preceded it.

use crate::models::Identity;
use async_trait::async_trait;
use reqwest::StatusCode;
use service_core::observability::TracedRequestExt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoleGrantError {
    #[error("Role not found: {0}")]
    NotFound(String),

    #[error("Role grant unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RoleGrant: Send + Sync {
    async fn grant_role(&self, identity: Identity, role_name: &str) -> Result<(), RoleGrantError>;
}

/// Used when no role-grant endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRoleGrant;

#[async_trait]
impl RoleGrant for DisabledRoleGrant {
    async fn grant_role(&self, _identity: Identity, _role_name: &str) -> Result<(), RoleGrantError> {
        Err(RoleGrantError::Unavailable(
            "role grants are not configured".to_string(),
        ))
    }
}

/// Grants roles through the chat gateway's HTTP API:
/// `POST {endpoint}/roles/{role}/members/{identity}`.
#[derive(Clone)]
pub struct HttpRoleGrant {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRoleGrant {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn member_url(&self, identity: Identity, role_name: &str) -> Result<reqwest::Url, RoleGrantError> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| RoleGrantError::Unavailable(format!("invalid endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RoleGrantError::Unavailable("endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["roles", role_name, "members", &identity.to_string()]);
        Ok(url)
    }
}

#[async_trait]
impl RoleGrant for HttpRoleGrant {
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    async fn grant_role(&self, identity: Identity, role_name: &str) -> Result<(), RoleGrantError> {
        let url = self.member_url(identity, role_name)?;

        let response = self
            .client
            .post(url)
            .with_trace_context()
            .send()
            .await
            .map_err(|e| RoleGrantError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(RoleGrantError::NotFound(role_name.to_string())),
            status => Err(RoleGrantError::Unavailable(format!(
                "gateway responded with {}",
                status
            ))),
        }
    }
}
