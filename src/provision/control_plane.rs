//! The control-plane seam used by provisioning.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

use crate::error::ApiResult;

/// Validity of issued credentials in days.
pub const CREDENTIAL_VALIDITY_DAYS: i64 = 365;

/// Kind of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Storage namespace.
    Namespace,
    /// Request gateway.
    Gateway,
    /// Scoped credential.
    Credential,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Namespace => "namespace",
            Self::Gateway => "gateway",
            Self::Credential => "credential",
        };
        write!(f, "{s}")
    }
}

/// A resource as known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Identifier assigned by the control plane.
    pub remote_id: Option<String>,
}

/// What to create when a resource is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Require authenticated access. Only meaningful for gateways.
    pub authenticated: bool,
}

impl ResourceSpec {
    /// A namespace spec.
    #[must_use]
    pub fn namespace(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Namespace,
            authenticated: false,
        }
    }

    /// A gateway spec.
    #[must_use]
    pub fn gateway(name: impl Into<String>, authenticated: bool) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Gateway,
            authenticated,
        }
    }
}

/// Request for a credential limited to one gateway's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    /// Name given to the credential.
    pub name: String,
    /// Account the credential is scoped to.
    pub account_id: String,
    /// Gateway the credential is meant for.
    pub gateway: String,
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub expires_on: DateTime<Utc>,
}

impl CredentialRequest {
    /// A request valid from `now` for [`CREDENTIAL_VALIDITY_DAYS`].
    #[must_use]
    pub fn for_gateway(account_id: &str, gateway: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: format!("{gateway} gateway access"),
            account_id: account_id.to_string(),
            gateway: gateway.to_string(),
            not_before: now,
            expires_on: now + Duration::days(CREDENTIAL_VALIDITY_DAYS),
        }
    }

    /// Resource scope string of the target account.
    #[must_use]
    pub fn account_scope(&self) -> String {
        format!("com.cloudflare.api.account.{}", self.account_id)
    }
}

/// A credential returned by the control plane.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    /// Credential identifier.
    pub id: String,
    /// Secret value.
    pub secret: String,
    /// End of validity.
    pub expires_on: DateTime<Utc>,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Remote API managing the lifecycle of resources.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Looks a resource up by name.
    ///
    /// # Errors
    ///
    /// Returns the API error, including the one signalling absence.
    async fn fetch(&self, kind: ResourceKind, name: &str) -> ApiResult<ResourceDescriptor>;

    /// Creates a resource.
    ///
    /// # Errors
    ///
    /// Returns the API error if creation fails.
    async fn create(&self, spec: &ResourceSpec) -> ApiResult<ResourceDescriptor>;

    /// Issues a scoped, time-bound credential.
    ///
    /// # Errors
    ///
    /// Returns the API error if issuance fails.
    async fn issue_credential(&self, request: &CredentialRequest) -> ApiResult<IssuedCredential>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_credential_window_is_one_year() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("valid date");
        let request = CredentialRequest::for_gateway("acct123", "acme-gw", now);
        assert_eq!(request.not_before, now);
        assert_eq!((request.expires_on - now).num_days(), 365);
        assert_eq!(request.account_scope(), "com.cloudflare.api.account.acct123");
    }

    #[test]
    fn test_issued_credential_debug_is_redacted() {
        let credential = IssuedCredential {
            id: String::from("tok"),
            secret: String::from("very-secret"),
            expires_on: Utc::now(),
        };
        assert!(!format!("{credential:?}").contains("very-secret"));
    }
}
