//! Idempotent "ensure exists" provisioning.
//!
//! Each declared resource is looked up first and created only when the
//! lookup positively reports it missing. A create that reports the resource
//! as already present adopts it. Namespaces are required for the
//! deployment, so their failures halt the run; the gateway branch only
//! records warnings.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DeployEnv, WorkerSettings};
use crate::error::{ApiError, ApiResult, EdgeshipError, Result};
use crate::report::error_chain;

use super::control_plane::{
    ControlPlane, CredentialRequest, IssuedCredential, ResourceDescriptor, ResourceKind,
    ResourceSpec,
};
use super::not_found::{
    AlreadyExistsMatcher, AlreadyExistsPredicate, NotFoundMatcher, NotFoundPredicate,
};

/// Longest gateway name the control plane accepts.
pub const MAX_GATEWAY_NAME_LEN: usize = 64;

/// Root of derived gateway endpoint URLs.
pub const GATEWAY_URL_BASE: &str = "https://gateway.ai.cloudflare.com/v1";

/// Resources one run must ensure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionPlan {
    /// Account owning the resources.
    pub account_id: String,
    /// Namespaces, deduplicated, in declaration order.
    pub namespaces: Vec<String>,
    /// Gateway name, if one is configured.
    pub gateway: Option<String>,
    /// A usable gateway secret is already configured.
    pub reuse_credential: bool,
}

impl ProvisionPlan {
    /// Builds the plan from validated inputs and the worker configuration.
    #[must_use]
    pub fn from_inputs(env: &DeployEnv, worker: &WorkerSettings) -> Self {
        let mut namespaces: Vec<String> = Vec::new();
        for binding in &worker.r2_buckets {
            if !namespaces.contains(&binding.bucket_name) {
                namespaces.push(binding.bucket_name.clone());
            }
        }

        Self {
            account_id: env.account_id.clone(),
            namespaces,
            gateway: env
                .gateway_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            reuse_credential: env.usable_gateway_token().is_some(),
        }
    }
}

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProvisionOutcome {
    /// Already present; nothing was done.
    Existing,
    /// Created by this run.
    Created,
    /// Not attempted.
    Skipped {
        /// Why it was skipped.
        reason: String,
    },
    /// Attempted and failed without halting the run.
    Failed,
}

/// Per-resource result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceReport {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical name.
    pub name: String,
    /// Outcome.
    pub outcome: ProvisionOutcome,
    /// Remote identifier, when known.
    pub remote_id: Option<String>,
}

impl ResourceReport {
    fn resolved(descriptor: ResourceDescriptor, outcome: ProvisionOutcome) -> Self {
        Self {
            kind: descriptor.kind,
            name: descriptor.name,
            outcome,
            remote_id: descriptor.remote_id,
        }
    }

    fn unresolved(kind: ResourceKind, name: &str, outcome: ProvisionOutcome) -> Self {
        Self {
            kind,
            name: name.to_string(),
            outcome,
            remote_id: None,
        }
    }
}

/// Result of a provisioning pass.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Resource results; namespaces first, then the gateway.
    pub resources: Vec<ResourceReport>,
    /// Recoverable failures.
    pub warnings: Vec<EdgeshipError>,
    /// Credential issued during this run.
    pub credential: Option<IssuedCredential>,
    /// Endpoint of the ensured gateway.
    pub gateway_url: Option<String>,
}

impl ProvisionReport {
    /// Number of resources created by this run.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.outcome == ProvisionOutcome::Created)
            .count()
    }
}

#[derive(Default)]
struct GatewayBranch {
    report: Option<ResourceReport>,
    warnings: Vec<EdgeshipError>,
    credential: Option<IssuedCredential>,
}

impl GatewayBranch {
    fn warn(&mut self, error: EdgeshipError) {
        let causes = error_chain(&error);
        if causes.is_empty() {
            warn!("{error}");
        } else {
            warn!("{error}: {}", causes.join(": "));
        }
        self.warnings.push(error);
    }
}

/// Ensures declared resources exist on the control plane.
pub struct ProvisioningPipeline {
    control_plane: Arc<dyn ControlPlane>,
    not_found: Arc<dyn NotFoundPredicate>,
    already_exists: Arc<dyn AlreadyExistsPredicate>,
}

impl ProvisioningPipeline {
    /// Creates a pipeline with the default response matchers.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            not_found: Arc::new(NotFoundMatcher::default()),
            already_exists: Arc::new(AlreadyExistsMatcher::default()),
        }
    }

    /// Replaces the not-found predicate.
    #[must_use]
    pub fn with_not_found(mut self, predicate: impl NotFoundPredicate + 'static) -> Self {
        self.not_found = Arc::new(predicate);
        self
    }

    /// Replaces the already-exists predicate.
    #[must_use]
    pub fn with_already_exists(mut self, predicate: impl AlreadyExistsPredicate + 'static) -> Self {
        self.already_exists = Arc::new(predicate);
        self
    }

    /// Runs the plan. Namespaces and the gateway branch run concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first namespace failure in declaration order.
    pub async fn run(&self, plan: &ProvisionPlan) -> Result<ProvisionReport> {
        info!(
            "Provisioning {} namespace(s){}",
            plan.namespaces.len(),
            plan.gateway
                .as_deref()
                .map_or_else(String::new, |g| format!(" and gateway '{g}'"))
        );

        let namespaces = join_all(plan.namespaces.iter().map(|name| self.ensure_namespace(name)));
        let (namespace_results, gateway) = futures::join!(namespaces, self.ensure_gateway(plan));

        let mut report = ProvisionReport::default();
        for result in namespace_results {
            report.resources.push(result?);
        }

        if let Some(gateway_report) = gateway.report {
            if matches!(
                gateway_report.outcome,
                ProvisionOutcome::Existing | ProvisionOutcome::Created
            ) {
                report.gateway_url = Some(format!(
                    "{GATEWAY_URL_BASE}/{}/{}",
                    plan.account_id, gateway_report.name
                ));
            }
            report.resources.push(gateway_report);
        }
        report.warnings = gateway.warnings;
        report.credential = gateway.credential;

        info!(
            "Provisioning finished: {} resource(s), {} created, {} warning(s)",
            report.resources.len(),
            report.created_count(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Fetches a resource, mapping a positive absence signal to `None`.
    async fn lookup(&self, kind: ResourceKind, name: &str) -> ApiResult<Option<ResourceDescriptor>> {
        match self.control_plane.fetch(kind, name).await {
            Ok(found) => Ok(Some(found)),
            Err(e) if self.not_found.is_not_found(&e) => {
                debug!("{kind} '{name}' not found: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Creates a resource. A conflict means another creator won the race
    /// between lookup and create, so the resource is adopted as existing.
    async fn create_or_adopt(&self, spec: &ResourceSpec) -> ApiResult<ResourceReport> {
        let error = match self.control_plane.create(spec).await {
            Ok(created) => return Ok(ResourceReport::resolved(created, ProvisionOutcome::Created)),
            Err(e) if self.already_exists.is_already_exists(&e) => e,
            Err(e) => return Err(e),
        };

        info!("{} '{}' appeared before it was created: {error}", spec.kind, spec.name);
        match self.control_plane.fetch(spec.kind, &spec.name).await {
            Ok(found) => Ok(ResourceReport::resolved(found, ProvisionOutcome::Existing)),
            Err(e) => {
                debug!("Re-fetching {} '{}' failed: {e}", spec.kind, spec.name);
                Ok(ResourceReport::unresolved(
                    spec.kind,
                    &spec.name,
                    ProvisionOutcome::Existing,
                ))
            }
        }
    }

    async fn ensure_namespace(&self, name: &str) -> Result<ResourceReport> {
        let kind = ResourceKind::Namespace;
        let failed = |source: ApiError| EdgeshipError::Provision {
            kind: kind.to_string(),
            name: name.to_string(),
            source,
        };

        if let Some(found) = self.lookup(kind, name).await.map_err(failed)? {
            info!("Namespace '{name}' already exists");
            return Ok(ResourceReport::resolved(found, ProvisionOutcome::Existing));
        }

        let report = self
            .create_or_adopt(&ResourceSpec::namespace(name))
            .await
            .map_err(failed)?;
        if report.outcome == ProvisionOutcome::Created {
            info!("Created namespace '{name}'");
        }
        Ok(report)
    }

    async fn ensure_gateway(&self, plan: &ProvisionPlan) -> GatewayBranch {
        let mut branch = GatewayBranch::default();
        let kind = ResourceKind::Gateway;

        let Some(name) = plan.gateway.as_deref() else {
            debug!("No gateway configured, skipping gateway provisioning");
            return branch;
        };

        let len = name.chars().count();
        if len > MAX_GATEWAY_NAME_LEN {
            branch.report = Some(ResourceReport::unresolved(
                kind,
                name,
                ProvisionOutcome::Skipped {
                    reason: format!("name longer than {MAX_GATEWAY_NAME_LEN} characters"),
                },
            ));
            branch.warn(EdgeshipError::GatewayNameTooLong {
                name: name.to_string(),
                len,
                max: MAX_GATEWAY_NAME_LEN,
            });
            return branch;
        }

        let outcome = match self.lookup(kind, name).await {
            Ok(Some(found)) => {
                info!("Gateway '{name}' already exists");
                ResourceReport::resolved(found, ProvisionOutcome::Existing)
            }
            Ok(None) => self.create_gateway(plan, name, &mut branch).await,
            Err(source) => {
                branch.warn(EdgeshipError::Provision {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    source,
                });
                ResourceReport::unresolved(kind, name, ProvisionOutcome::Failed)
            }
        };
        branch.report = Some(outcome);
        branch
    }

    async fn create_gateway(
        &self,
        plan: &ProvisionPlan,
        name: &str,
        branch: &mut GatewayBranch,
    ) -> ResourceReport {
        let authenticated = if plan.reuse_credential {
            info!("Reusing the configured gateway token");
            true
        } else {
            let request = CredentialRequest::for_gateway(&plan.account_id, name, Utc::now());
            match self.control_plane.issue_credential(&request).await {
                Ok(credential) => {
                    info!(
                        "Issued credential {} for gateway '{name}', valid until {}",
                        credential.id,
                        credential.expires_on.format("%Y-%m-%d")
                    );
                    branch.credential = Some(credential);
                    true
                }
                Err(source) => {
                    branch.warn(EdgeshipError::Credential {
                        gateway: name.to_string(),
                        source,
                    });
                    false
                }
            }
        };

        match self
            .create_or_adopt(&ResourceSpec::gateway(name, authenticated))
            .await
        {
            Ok(report) => {
                if report.outcome == ProvisionOutcome::Created {
                    info!("Created gateway '{name}' (authentication: {authenticated})");
                }
                report
            }
            Err(source) => {
                branch.warn(EdgeshipError::Provision {
                    kind: ResourceKind::Gateway.to_string(),
                    name: name.to_string(),
                    source,
                });
                ResourceReport::unresolved(ResourceKind::Gateway, name, ProvisionOutcome::Failed)
            }
        }
    }
}
