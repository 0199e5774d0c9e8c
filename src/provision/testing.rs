//! In-memory control plane for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::error::{ApiError, ApiResult};

use super::control_plane::{
    ControlPlane, CredentialRequest, IssuedCredential, ResourceDescriptor, ResourceKind,
    ResourceSpec,
};

/// Records every call and remembers what it created.
#[derive(Default)]
pub struct FakeControlPlane {
    existing: Mutex<BTreeSet<(ResourceKind, String)>>,
    calls: Mutex<Vec<String>>,
    fetch_failures: BTreeMap<String, u16>,
    racing: BTreeSet<String>,
    issuance_fails: bool,
}

impl FakeControlPlane {
    /// Lookups of `name` fail with `status` instead of reporting absence.
    pub fn failing_fetch(mut self, name: &str, status: u16) -> Self {
        self.fetch_failures.insert(name.to_string(), status);
        self
    }

    /// Someone else creates `name` first: lookups report it missing until
    /// this fake's create runs, which then answers with a conflict.
    pub fn racing_create(mut self, name: &str) -> Self {
        self.racing.insert(name.to_string());
        self
    }

    /// Credential issuance fails.
    pub fn failing_issuance(mut self) -> Self {
        self.issuance_fails = true;
        self
    }

    /// Calls in order, e.g. `create gateway acme-gw auth=true`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn log(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn fetch(&self, kind: ResourceKind, name: &str) -> ApiResult<ResourceDescriptor> {
        self.log(format!("fetch {kind} {name}"));
        if let Some(status) = self.fetch_failures.get(name) {
            return Err(ApiError::request(*status, None, "upstream failure"));
        }
        let exists = self
            .existing
            .lock()
            .expect("existing lock")
            .contains(&(kind, name.to_string()));
        if exists {
            Ok(ResourceDescriptor {
                name: name.to_string(),
                kind,
                remote_id: Some(format!("{kind}-{name}")),
            })
        } else {
            Err(ApiError::request(404, Some(10006), "does not exist"))
        }
    }

    async fn create(&self, spec: &ResourceSpec) -> ApiResult<ResourceDescriptor> {
        let call = match spec.kind {
            ResourceKind::Gateway => {
                format!("create gateway {} auth={}", spec.name, spec.authenticated)
            }
            kind => format!("create {kind} {}", spec.name),
        };
        self.log(call);
        self.existing
            .lock()
            .expect("existing lock")
            .insert((spec.kind, spec.name.clone()));
        if self.racing.contains(&spec.name) {
            return Err(ApiError::request(
                409,
                Some(10004),
                "The bucket you tried to create already exists, and you own it.",
            ));
        }
        Ok(ResourceDescriptor {
            name: spec.name.clone(),
            kind: spec.kind,
            remote_id: Some(format!("{}-{}", spec.kind, spec.name)),
        })
    }

    async fn issue_credential(&self, request: &CredentialRequest) -> ApiResult<IssuedCredential> {
        self.log(format!("issue {}", request.gateway));
        if self.issuance_fails {
            return Err(ApiError::AuthenticationFailed {
                message: String::from("token cannot create tokens"),
            });
        }
        Ok(IssuedCredential {
            id: format!("tok-{}", request.gateway),
            secret: String::from("issued-secret"),
            expires_on: request.expires_on,
        })
    }
}
