//! Run orchestration.
//!
//! This module wires the components of a run together: the configuration
//! document is loaded once, provisioning and the instance-count patch run
//! concurrently, and the deployment steps only start when neither produced
//! a fatal error. Every failure ends up in the run's [`ErrorReporter`].

use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::env::{ACCOUNT_ID, API_TOKEN, GATEWAY_TOKEN, GATEWAY_URL, SECRET_ALLOW_LIST};
use crate::config::{ConfigDocument, DeployEnv, PipelineSettings};
use crate::deploy::{
    CommandAction, CommandRunner, DeploymentExecutor, ExecutionReport, PipelineStep, SecretSync,
    StepKind, TemplateSync,
};
use crate::error::Result;
use crate::patch::{ConfigPatcher, FieldPath, PatchOutcome};
use crate::provision::{ControlPlane, ProvisionPlan, ProvisionReport, ProvisioningPipeline};
use crate::report::ErrorReporter;

/// Which parts of a run to perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop after provisioning and patching.
    pub provision_only: bool,
    /// Leave the template checkout alone.
    pub skip_template_sync: bool,
    /// Deploy without building first.
    pub skip_build: bool,
}

/// Everything one run needs, built once before anything runs.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Identifier attached to every log line of the run.
    pub run_id: Uuid,
    /// Validated environment inputs.
    pub env: DeployEnv,
    /// Pipeline settings.
    pub settings: PipelineSettings,
    /// Selected stages.
    pub options: RunOptions,
}

impl RunContext {
    /// Creates a context with a fresh run id.
    #[must_use]
    pub fn new(env: DeployEnv, settings: PipelineSettings, options: RunOptions) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            env,
            settings,
            options,
        }
    }

    /// Directory holding the worker configuration; commands run there.
    #[must_use]
    pub fn project_dir(&self) -> PathBuf {
        match self.settings.worker_config.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// What a run produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Provisioning results, if provisioning completed.
    pub provision: Option<ProvisionReport>,
    /// Instance-count patch result, if an override was given.
    pub patch: Option<PatchOutcome>,
    /// Step results, if the executor ran.
    pub execution: Option<ExecutionReport>,
    /// Collected failures.
    pub reporter: ErrorReporter,
}

impl RunSummary {
    /// Process exit code of the run.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.reporter.exit_code()
    }
}

/// Drives one run from document load to secret sync.
pub struct Orchestrator {
    control_plane: Arc<dyn ControlPlane>,
    runner: Arc<dyn CommandRunner>,
}

impl Orchestrator {
    /// Creates an orchestrator over a control plane and a process runner.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            control_plane,
            runner,
        }
    }

    /// Performs the run. Failures are recorded in the summary's reporter.
    pub async fn run(&self, ctx: &RunContext) -> RunSummary {
        let mut summary = RunSummary::default();
        info!("Starting run {}", ctx.run_id);

        let mut document = match ConfigDocument::load(&ctx.settings.worker_config) {
            Ok(document) => document,
            Err(e) => {
                summary.reporter.record_fatal("load", &e);
                return summary;
            }
        };
        let worker = match document.worker_settings() {
            Ok(worker) => worker,
            Err(e) => {
                summary.reporter.record_fatal("load", &e);
                return summary;
            }
        };
        debug!(
            "Loaded worker '{}' with {} container(s)",
            worker.name,
            worker.containers.len()
        );

        let plan = ProvisionPlan::from_inputs(&ctx.env, &worker);
        let pipeline = ProvisioningPipeline::new(Arc::clone(&self.control_plane));
        let (provisioned, patched) =
            tokio::join!(pipeline.run(&plan), Self::apply_overrides(ctx, &mut document));

        match provisioned {
            Ok(mut report) => {
                for warning in std::mem::take(&mut report.warnings) {
                    summary.reporter.record_warning("provision", &warning);
                }
                summary.provision = Some(report);
            }
            Err(e) => summary.reporter.record_fatal("provision", &e),
        }
        match patched {
            Ok(outcome) => summary.patch = outcome,
            Err(e) => summary.reporter.record_fatal("patch", &e),
        }

        if summary.reporter.has_fatal() {
            info!("Skipping deployment steps after a fatal error");
            return summary;
        }
        if ctx.options.provision_only {
            return summary;
        }

        let steps = Self::steps(ctx, summary.provision.as_ref());
        let executor = DeploymentExecutor::new(Arc::clone(&self.runner));
        match executor.execute(steps, &mut summary.reporter).await {
            Ok(report) => summary.execution = Some(report),
            Err(e) => summary.reporter.record_fatal("deploy", &e),
        }

        summary
    }

    /// Applies the instance-count override, persisting only real changes.
    async fn apply_overrides(
        ctx: &RunContext,
        document: &mut ConfigDocument,
    ) -> Result<Option<PatchOutcome>> {
        let Some(count) = ctx.env.instance_count else {
            debug!("No instance count override");
            return Ok(None);
        };

        let path = FieldPath::parse(&ctx.settings.instance_count_path())?;
        let patcher = ConfigPatcher::new();
        let outcome = patcher.set(document, &path, json!(count))?;
        if outcome.is_changed() {
            patcher.persist(document).await?;
        }
        Ok(Some(outcome))
    }

    /// Secrets obtained by provisioning: an issued gateway token and the
    /// derived gateway URL when none is configured.
    fn issued_secrets(ctx: &RunContext, provision: Option<&ProvisionReport>) -> BTreeMap<String, String> {
        let mut issued = BTreeMap::new();
        let Some(report) = provision else {
            return issued;
        };
        if let Some(credential) = &report.credential {
            issued.insert(GATEWAY_TOKEN.to_string(), credential.secret.clone());
        }
        if ctx.env.gateway_url.is_none()
            && let Some(url) = &report.gateway_url
        {
            issued.insert(GATEWAY_URL.to_string(), url.clone());
        }
        issued
    }

    fn steps(ctx: &RunContext, provision: Option<&ProvisionReport>) -> Vec<PipelineStep> {
        let settings = &ctx.settings;
        let commands = &settings.commands;
        let project_dir = ctx.project_dir();
        let account_env = BTreeMap::from([
            (API_TOKEN.to_string(), ctx.env.api_token.clone()),
            (ACCOUNT_ID.to_string(), ctx.env.account_id.clone()),
        ]);

        let issued = Self::issued_secrets(ctx, provision);
        let mut values = ctx.env.secrets.clone();
        values.extend(issued.clone());

        let mut steps = Vec::new();
        if !ctx.options.skip_template_sync {
            steps.push(PipelineStep::new(
                StepKind::TemplateSync,
                TemplateSync {
                    git: commands.git.clone(),
                    repo_url: ctx.env.template_repo.clone(),
                    dir: settings.templates_dir.clone(),
                },
            ));
        }
        if !ctx.options.skip_build {
            steps.push(PipelineStep::new(
                StepKind::Build,
                CommandAction::new(StepKind::Build, commands.build.clone(), &project_dir),
            ));
        }
        steps.push(PipelineStep::new(
            StepKind::Deploy,
            CommandAction {
                kind: StepKind::Deploy,
                command: commands.deploy.clone(),
                cwd: project_dir.clone(),
                env: account_env.clone(),
            },
        ));
        steps.push(PipelineStep::new(
            StepKind::SecretSync,
            SecretSync {
                command: commands.secret_sync.clone(),
                cwd: project_dir,
                path: settings.secrets_file.clone(),
                values,
                allow_list: SECRET_ALLOW_LIST.iter().map(|s| (*s).to_string()).collect(),
                overrides: issued,
                env: account_env,
            },
        ));
        steps
    }
}
