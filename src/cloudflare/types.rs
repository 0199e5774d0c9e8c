//! Cloudflare API types and data structures.
//!
//! This module defines the request and response bodies used with the
//! Cloudflare v4 REST API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard v4 response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Whether the call succeeded.
    #[serde(default)]
    pub success: bool,
    /// Errors reported by the API.
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    /// Payload.
    pub result: Option<T>,
}

/// One entry of the envelope's `errors` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiMessage {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable message.
    pub message: String,
}

impl<T> Envelope<T> {
    /// First error code, if any.
    #[must_use]
    pub fn first_code(&self) -> Option<u32> {
        self.errors.first().map(|e| e.code)
    }

    /// All error messages joined for display.
    #[must_use]
    pub fn joined_messages(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// An R2 bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct R2Bucket {
    /// Bucket name.
    pub name: String,
    /// Creation timestamp.
    #[serde(default)]
    pub creation_date: Option<String>,
    /// Location hint.
    #[serde(default)]
    pub location: Option<String>,
}

/// Body of a bucket creation request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateBucketRequest {
    /// Bucket name.
    pub name: String,
}

/// An AI Gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiGateway {
    /// Gateway identifier, which is also its name.
    pub id: String,
    /// Whether requests must carry a gateway token.
    #[serde(default)]
    pub authentication: bool,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Body of a gateway creation request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateGatewayRequest {
    /// Gateway identifier.
    pub id: String,
    /// Require authenticated requests.
    pub authentication: bool,
    /// Response cache TTL in seconds; zero disables caching.
    pub cache_ttl: u32,
    /// Invalidate cached responses when the gateway is updated.
    pub cache_invalidate_on_update: bool,
    /// Keep request logs.
    pub collect_logs: bool,
    /// Rate limiting window in seconds.
    pub rate_limiting_interval: u32,
    /// Requests per window; zero disables rate limiting.
    pub rate_limiting_limit: u32,
    /// `fixed` or `sliding`.
    pub rate_limiting_technique: String,
}

impl CreateGatewayRequest {
    /// Request for a gateway with logging on and caching and rate limiting off.
    #[must_use]
    pub fn new(id: impl Into<String>, authentication: bool) -> Self {
        Self {
            id: id.into(),
            authentication,
            cache_ttl: 0,
            cache_invalidate_on_update: false,
            collect_logs: true,
            rate_limiting_interval: 0,
            rate_limiting_limit: 0,
            rate_limiting_technique: String::from("fixed"),
        }
    }
}

/// A permission group that tokens can be granted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGroup {
    /// Group identifier.
    pub id: String,
    /// Display name such as `AI Gateway Read`.
    pub name: String,
}

/// Reference to a permission group inside a policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionGroupRef {
    /// Group identifier.
    pub id: String,
}

/// One token policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPolicy {
    /// `allow` or `deny`.
    pub effect: String,
    /// Resource scope, e.g. `com.cloudflare.api.account.<id>` mapped to `*`.
    pub resources: BTreeMap<String, String>,
    /// Granted permission groups.
    pub permission_groups: Vec<PermissionGroupRef>,
}

/// Client IP restrictions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpCondition {
    /// Allowed ranges.
    #[serde(rename = "in")]
    pub allowed: Vec<String>,
    /// Denied ranges.
    pub not_in: Vec<String>,
}

/// Token usage conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenCondition {
    /// Request IP condition.
    pub request_ip: IpCondition,
}

/// Body of a token creation request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTokenRequest {
    /// Token name.
    pub name: String,
    /// Policies.
    pub policies: Vec<TokenPolicy>,
    /// Validity start, RFC 3339.
    pub not_before: String,
    /// Validity end, RFC 3339.
    pub expires_on: String,
    /// Usage conditions.
    pub condition: TokenCondition,
}

/// A newly created token.
#[derive(Clone, Deserialize)]
pub struct CreatedToken {
    /// Token identifier.
    pub id: String,
    /// Secret value; only returned at creation time.
    pub value: String,
    /// Validity end, RFC 3339.
    #[serde(default)]
    pub expires_on: Option<String>,
}

impl std::fmt::Debug for CreatedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedToken")
            .field("id", &self.id)
            .field("value", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_errors() {
        let envelope: Envelope<R2Bucket> = serde_json::from_value(json!({
            "success": false,
            "errors": [{"code": 10006, "message": "The specified bucket does not exist."}],
            "messages": [],
            "result": null
        }))
        .expect("should deserialize");
        assert!(!envelope.success);
        assert_eq!(envelope.first_code(), Some(10006));
        assert_eq!(
            envelope.joined_messages(),
            "The specified bucket does not exist. (10006)"
        );
    }

    #[test]
    fn test_token_condition_serializes_reserved_key() {
        let value = serde_json::to_value(TokenCondition::default()).expect("serialize");
        assert_eq!(value, json!({"request_ip": {"in": [], "not_in": []}}));
    }
}
