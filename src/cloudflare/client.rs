//! Cloudflare API client implementation.
//!
//! This module provides the HTTP client for the Cloudflare v4 REST API and
//! its [`ControlPlane`] implementation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ApiError, ApiResult};
use crate::provision::{
    ControlPlane, CredentialRequest, IssuedCredential, ResourceDescriptor, ResourceKind,
    ResourceSpec,
};

use super::types::{
    AiGateway, CreateBucketRequest, CreateGatewayRequest, CreateTokenRequest, CreatedToken,
    Envelope, PermissionGroup, PermissionGroupRef, R2Bucket, TokenCondition, TokenPolicy,
};

/// Cloudflare API base URL.
pub const CLOUDFLARE_API_URL: &str = "https://api.cloudflare.com/client/v4";

/// Permission groups granted to gateway credentials.
pub const GATEWAY_PERMISSION_GROUPS: [&str; 3] =
    ["AI Gateway Read", "AI Gateway Edit", "AI Gateway Run"];

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Upper bound on a server-suggested retry delay.
const MAX_RETRY_DELAY_SECS: u64 = 30;

/// Cloudflare API client bound to one account.
#[derive(Clone)]
pub struct CloudflareClient {
    /// HTTP client.
    client: Client,
    /// API token.
    api_token: String,
    /// Account identifier.
    account_id: String,
    /// API base URL.
    base_url: String,
    /// Attempts per request.
    max_retries: u32,
    /// Cap on the delay before a retry.
    max_retry_delay: Duration,
}

impl std::fmt::Debug for CloudflareClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareClient")
            .field("account_id", &self.account_id)
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("max_retry_delay", &self.max_retry_delay)
            .finish_non_exhaustive()
    }
}

impl CloudflareClient {
    /// Creates a new Cloudflare API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_token: &str, account_id: &str) -> ApiResult<Self> {
        Self::with_timeout(api_token, account_id, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(api_token: &str, account_id: &str, timeout_secs: u64) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_token: api_token.to_string(),
            account_id: account_id.to_string(),
            base_url: CLOUDFLARE_API_URL.to_string(),
            max_retries: MAX_RETRIES,
            max_retry_delay: Duration::from_secs(MAX_RETRY_DELAY_SECS),
        })
    }

    /// Points the client at another API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the number of attempts per request (at least one).
    #[must_use]
    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = attempts.max(1);
        self
    }

    /// Caps the delay before a retry, including `Retry-After` hints.
    #[must_use]
    pub const fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    fn account_url(&self, path: &str) -> String {
        format!("{}/accounts/{}/{path}", self.base_url, self.account_id)
    }

    /// Delay before retry `attempt`: linear backoff, or the server's hint
    /// when that is longer, capped.
    fn retry_delay(&self, attempt: u32, last_error: Option<&ApiError>) -> Duration {
        let linear = Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt));
        let suggested = last_error
            .and_then(ApiError::retry_delay_secs)
            .map_or(Duration::ZERO, Duration::from_secs);
        linear.max(suggested).min(self.max_retry_delay)
    }

    /// Executes a request, retrying transient failures with linear backoff.
    async fn execute<T, F>(&self, build: F) -> ApiResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay(attempt, last_error.as_ref());
                debug!(
                    "Retry attempt {attempt} of {} in {}ms",
                    self.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            match self.execute_once::<T>(build()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ApiError::network("Max retries exceeded")))
    }

    /// Executes a single request and unwraps the response envelope.
    async fn execute_once<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_token))
            .send()
            .await
            .map_err(|e| ApiError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("Response status: {status}");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(ApiError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;
        let envelope = serde_json::from_str::<Envelope<T>>(&body);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = envelope
                .ok()
                .map(|e| e.joined_messages())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| String::from("Invalid API token"));
            return Err(ApiError::AuthenticationFailed { message });
        }

        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ApiError::request(status.as_u16(), None, truncate(&body)));
            }
            Err(e) => {
                return Err(ApiError::InvalidResponse {
                    message: format!("Failed to parse response: {e}"),
                });
            }
        };

        if !status.is_success() || !envelope.success {
            let message = envelope.joined_messages();
            let message = if message.is_empty() {
                status.to_string()
            } else {
                message
            };
            return Err(ApiError::request(status.as_u16(), envelope.first_code(), message));
        }

        envelope.result.ok_or_else(|| ApiError::InvalidResponse {
            message: String::from("No result in response"),
        })
    }

    /// Gets an R2 bucket by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket does not exist or the API call fails.
    pub async fn get_bucket(&self, name: &str) -> ApiResult<R2Bucket> {
        let url = self.account_url(&format!("r2/buckets/{name}"));
        self.execute(|| self.client.get(&url)).await
    }

    /// Creates an R2 bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be created.
    pub async fn create_bucket(&self, name: &str) -> ApiResult<R2Bucket> {
        let url = self.account_url("r2/buckets");
        let body = CreateBucketRequest {
            name: name.to_string(),
        };
        self.execute(|| self.client.post(&url).json(&body)).await
    }

    /// Gets an AI Gateway by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway does not exist or the API call fails.
    pub async fn get_gateway(&self, id: &str) -> ApiResult<AiGateway> {
        let url = self.account_url(&format!("ai-gateway/gateways/{id}"));
        self.execute(|| self.client.get(&url)).await
    }

    /// Creates an AI Gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway cannot be created.
    pub async fn create_gateway(&self, request: &CreateGatewayRequest) -> ApiResult<AiGateway> {
        let url = self.account_url("ai-gateway/gateways");
        self.execute(|| self.client.post(&url).json(request)).await
    }

    /// Lists the permission groups tokens can be granted.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn permission_groups(&self) -> ApiResult<Vec<PermissionGroup>> {
        let url = format!("{}/user/tokens/permission_groups", self.base_url);
        self.execute(|| self.client.get(&url)).await
    }

    /// Creates an API token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be created.
    pub async fn create_token(&self, request: &CreateTokenRequest) -> ApiResult<CreatedToken> {
        let url = format!("{}/user/tokens", self.base_url);
        self.execute(|| self.client.post(&url).json(request)).await
    }

    /// Builds the token request for a gateway credential.
    fn token_request(
        request: &CredentialRequest,
        groups: &[PermissionGroup],
    ) -> ApiResult<CreateTokenRequest> {
        let mut permission_groups = Vec::with_capacity(GATEWAY_PERMISSION_GROUPS.len());
        let mut missing = Vec::new();

        for wanted in GATEWAY_PERMISSION_GROUPS {
            match groups.iter().find(|g| g.name == wanted) {
                Some(group) => permission_groups.push(PermissionGroupRef {
                    id: group.id.clone(),
                }),
                None => missing.push(wanted),
            }
        }

        if !missing.is_empty() {
            return Err(ApiError::InvalidResponse {
                message: format!("Permission groups not available: {}", missing.join(", ")),
            });
        }

        let mut resources = BTreeMap::new();
        resources.insert(request.account_scope(), String::from("*"));

        Ok(CreateTokenRequest {
            name: request.name.clone(),
            policies: vec![TokenPolicy {
                effect: String::from("allow"),
                resources,
                permission_groups,
            }],
            not_before: timestamp(request.not_before),
            expires_on: timestamp(request.expires_on),
            condition: TokenCondition::default(),
        })
    }
}

#[async_trait]
impl ControlPlane for CloudflareClient {
    async fn fetch(&self, kind: ResourceKind, name: &str) -> ApiResult<ResourceDescriptor> {
        let remote_id = match kind {
            ResourceKind::Namespace => self.get_bucket(name).await?.name,
            ResourceKind::Gateway => self.get_gateway(name).await?.id,
            ResourceKind::Credential => return Err(unsupported(kind, "looked up by name")),
        };
        Ok(ResourceDescriptor {
            name: name.to_string(),
            kind,
            remote_id: Some(remote_id),
        })
    }

    async fn create(&self, spec: &ResourceSpec) -> ApiResult<ResourceDescriptor> {
        let remote_id = match spec.kind {
            ResourceKind::Namespace => self.create_bucket(&spec.name).await?.name,
            ResourceKind::Gateway => {
                let request = CreateGatewayRequest::new(&spec.name, spec.authenticated);
                self.create_gateway(&request).await?.id
            }
            ResourceKind::Credential => return Err(unsupported(spec.kind, "created directly")),
        };
        Ok(ResourceDescriptor {
            name: spec.name.clone(),
            kind: spec.kind,
            remote_id: Some(remote_id),
        })
    }

    async fn issue_credential(&self, request: &CredentialRequest) -> ApiResult<IssuedCredential> {
        let groups = self.permission_groups().await?;
        let body = Self::token_request(request, &groups)?;
        let token = self.create_token(&body).await?;

        let expires_on = token
            .expires_on
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or(request.expires_on, |d| d.with_timezone(&Utc));

        Ok(IssuedCredential {
            id: token.id,
            secret: token.value,
            expires_on,
        })
    }
}

fn unsupported(kind: ResourceKind, what: &str) -> ApiError {
    ApiError::Unsupported {
        message: format!("a {kind} cannot be {what}"),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CloudflareClient {
        CloudflareClient::new("test-token", "acct123")
            .expect("client")
            .with_base_url(server.uri())
            .with_max_retries(1)
    }

    #[tokio::test]
    async fn test_missing_bucket_reports_status_and_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct123/r2/buckets/assets"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false,
                "errors": [{"code": 10006, "message": "The specified bucket does not exist."}],
                "result": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).get_bucket("assets").await.expect_err("should fail");
        assert!(matches!(
            err,
            ApiError::RequestFailed {
                status: 404,
                code: Some(10006),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_create_bucket_through_control_plane() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/acct123/r2/buckets"))
            .and(body_json(json!({"name": "assets"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": {"name": "assets", "creation_date": "2025-03-01T12:00:00Z"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .create(&ResourceSpec::namespace("assets"))
            .await
            .expect("should create");
        assert_eq!(created.kind, ResourceKind::Namespace);
        assert_eq!(created.remote_id.as_deref(), Some("assets"));
    }

    #[tokio::test]
    async fn test_create_gateway_sends_authentication_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/acct123/ai-gateway/gateways"))
            .and(body_partial_json(json!({"id": "acme-gw", "authentication": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": {"id": "acme-gw", "authentication": true}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .create(&ResourceSpec::gateway("acme-gw", true))
            .await
            .expect("should create");
        assert_eq!(created.remote_id.as_deref(), Some("acme-gw"));
    }

    #[tokio::test]
    async fn test_issue_credential_scopes_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/tokens/permission_groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [
                    {"id": "g-read", "name": "AI Gateway Read"},
                    {"id": "g-edit", "name": "AI Gateway Edit"},
                    {"id": "g-run", "name": "AI Gateway Run"},
                    {"id": "g-dns", "name": "DNS Read"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user/tokens"))
            .and(body_partial_json(json!({
                "not_before": "2025-03-01T12:00:00Z",
                "expires_on": "2026-03-01T12:00:00Z",
                "condition": {"request_ip": {"in": [], "not_in": []}},
                "policies": [{
                    "effect": "allow",
                    "resources": {"com.cloudflare.api.account.acct123": "*"},
                    "permission_groups": [{"id": "g-read"}, {"id": "g-edit"}, {"id": "g-run"}]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": {"id": "tok-1", "value": "issued-secret", "expires_on": "2026-03-01T12:00:00Z"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("date");
        let request = CredentialRequest::for_gateway("acct123", "acme-gw", now);
        let issued = client(&server)
            .issue_credential(&request)
            .await
            .expect("should issue");
        assert_eq!(issued.id, "tok-1");
        assert_eq!(issued.secret, "issued-secret");
        assert_eq!(issued.expires_on, request.expires_on);
    }

    #[tokio::test]
    async fn test_missing_permission_group_fails_issuance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/tokens/permission_groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [{"id": "g-read", "name": "AI Gateway Read"}]
            })))
            .mount(&server)
            .await;

        let request = CredentialRequest::for_gateway("acct123", "acme-gw", Utc::now());
        let err = client(&server)
            .issue_credential(&request)
            .await
            .expect_err("should fail");
        assert!(matches!(err, ApiError::InvalidResponse { .. }));
        assert!(err.to_string().contains("AI Gateway Run"));
    }

    #[tokio::test]
    async fn test_auth_and_rate_limit_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct123/ai-gateway/gateways/locked"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "success": false,
                "errors": [{"code": 10000, "message": "Authentication error"}],
                "result": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct123/ai-gateway/gateways/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.get_gateway("locked").await,
            Err(ApiError::AuthenticationFailed { .. })
        ));
        assert!(matches!(
            client.get_gateway("busy").await,
            Err(ApiError::RateLimited { retry_after_secs: 7 })
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct123/ai-gateway/gateways/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct123/ai-gateway/gateways/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": {"id": "busy", "authentication": false}
            })))
            .mount(&server)
            .await;

        let gateway = client(&server)
            .with_max_retries(2)
            .with_max_retry_delay(Duration::from_millis(20))
            .get_gateway("busy")
            .await
            .expect("second attempt succeeds");
        assert_eq!(gateway.id, "busy");
    }

    #[test]
    fn test_retry_delay_honours_hint_within_cap() {
        let client = CloudflareClient::new("t", "a").expect("client");
        let limited = ApiError::RateLimited { retry_after_secs: 7 };
        assert_eq!(client.retry_delay(1, Some(&limited)), Duration::from_secs(7));
        assert_eq!(
            client.retry_delay(1, Some(&ApiError::RateLimited { retry_after_secs: 600 })),
            Duration::from_secs(MAX_RETRY_DELAY_SECS)
        );
        assert_eq!(
            client.retry_delay(2, Some(&ApiError::network("reset"))),
            Duration::from_millis(2 * RETRY_DELAY_MS)
        );

        let capped = client.with_max_retry_delay(Duration::from_millis(5));
        assert_eq!(capped.retry_delay(1, Some(&limited)), Duration::from_millis(5));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = truncate(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 515);
    }
}
