//! Caller resolution and permission oracles for balance-service.
//!
//! The ledger never decides platform privilege itself. The gRPC layer reads
//! the caller from request metadata and asks a [`PermissionOracle`] whether
//! that caller is privileged.

#![allow(clippy::result_large_err)]

use crate::models::Identity;
use crate::services::Caller;
use async_trait::async_trait;
use std::collections::HashSet;
use tonic::{Request, Status};

/// Metadata key carrying the caller identity.
pub const CALLER_ID_KEY: &str = "x-user-id";

/// Metadata key the upstream dispatcher sets to vouch for a privileged caller.
pub const CALLER_PRIVILEGED_KEY: &str = "x-caller-privileged";

/// Pre-extracted caller metadata.
/// Used to avoid borrowing the request across await points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerMetadata {
    pub identity: Identity,
    /// Privilege asserted by the upstream dispatcher, if any.
    pub privileged_claim: bool,
}

impl CallerMetadata {
    /// Extract caller metadata from a gRPC request.
    pub fn from_request<T>(request: &Request<T>) -> Result<Self, Status> {
        let identity = request
            .metadata()
            .get(CALLER_ID_KEY)
            .ok_or_else(|| Status::unauthenticated("Missing caller identity"))?
            .to_str()
            .map_err(|_| Status::unauthenticated("Invalid caller identity encoding"))?
            .parse::<Identity>()
            .map_err(|_| Status::unauthenticated("Malformed caller identity"))?;

        let privileged_claim = request
            .metadata()
            .get(CALLER_PRIVILEGED_KEY)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            identity,
            privileged_claim,
        })
    }
}

/// Answers whether a caller is privileged.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn is_privileged(&self, caller: &CallerMetadata) -> bool;
}

/// Trusts the privilege flag asserted by the upstream dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustedHeaderOracle;

#[async_trait]
impl PermissionOracle for TrustedHeaderOracle {
    async fn is_privileged(&self, caller: &CallerMetadata) -> bool {
        caller.privileged_claim
    }
}

/// Privileged iff the caller is in a configured admin set. Header claims are
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct AdminListOracle {
    admins: HashSet<Identity>,
}

impl AdminListOracle {
    pub fn new(admins: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PermissionOracle for AdminListOracle {
    async fn is_privileged(&self, caller: &CallerMetadata) -> bool {
        self.admins.contains(&caller.identity)
    }
}

/// Fixed answer, for tests and single-operator deployments.
#[derive(Debug, Clone, Copy)]
pub struct FixedOracle(pub bool);

#[async_trait]
impl PermissionOracle for FixedOracle {
    async fn is_privileged(&self, _caller: &CallerMetadata) -> bool {
        self.0
    }
}

/// Resolve the caller of a request into a ledger [`Caller`].
pub async fn resolve_caller(
    oracle: &dyn PermissionOracle,
    metadata: CallerMetadata,
) -> Caller {
    let privileged = oracle.is_privileged(&metadata).await;
    Caller::new(metadata.identity, privileged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(entries: &[(&'static str, &str)]) -> Request<()> {
        let mut request = Request::new(());
        for (key, value) in entries {
            request.metadata_mut().insert(*key, value.parse().unwrap());
        }
        request
    }

    #[test]
    fn missing_caller_is_unauthenticated() {
        let err = CallerMetadata::from_request(&Request::new(())).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn malformed_caller_is_unauthenticated() {
        let request = request_with(&[(CALLER_ID_KEY, "nobody")]);
        let err = CallerMetadata::from_request(&request).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn privilege_claim_defaults_to_false() {
        let request = request_with(&[(CALLER_ID_KEY, "77")]);
        let metadata = CallerMetadata::from_request(&request).unwrap();
        assert_eq!(metadata.identity, Identity::new(77).unwrap());
        assert!(!metadata.privileged_claim);
    }

    #[tokio::test]
    async fn trusted_header_oracle_follows_claim() {
        let request = request_with(&[(CALLER_ID_KEY, "77"), (CALLER_PRIVILEGED_KEY, "TRUE")]);
        let metadata = CallerMetadata::from_request(&request).unwrap();
        let caller = resolve_caller(&TrustedHeaderOracle, metadata).await;
        assert!(caller.privileged);
    }

    #[tokio::test]
    async fn admin_list_oracle_ignores_claim() {
        let oracle = AdminListOracle::new([Identity::new(1).unwrap()]);

        let claimed = request_with(&[(CALLER_ID_KEY, "77"), (CALLER_PRIVILEGED_KEY, "true")]);
        let caller = resolve_caller(&oracle, CallerMetadata::from_request(&claimed).unwrap()).await;
        assert!(!caller.privileged);

        let admin = request_with(&[(CALLER_ID_KEY, "1")]);
        let caller = resolve_caller(&oracle, CallerMetadata::from_request(&admin).unwrap()).await;
        assert!(caller.privileged);
    }
}
