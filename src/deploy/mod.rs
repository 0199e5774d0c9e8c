//! Deployment step execution.
//!
//! This module sequences the external actions of a deployment:
//! - Template sync, build, deploy and secret sync actions
//! - The executor that applies each step's blocking policy
//! - Secrets file generation
//! - The process runner seam

mod actions;
mod executor;
mod runner;
mod secrets;
mod step;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::{CommandAction, SecretSync, TemplateSync};
pub use executor::DeploymentExecutor;
pub use runner::{CommandRunner, Invocation, ProcessOutput, ProcessRunner};
pub use secrets::{live_entries, materialize, merge_entries, merge_into_file, render_secrets};
pub use step::{
    ActionOutcome, ExecutionReport, PipelineStep, StepAction, StepKind, StepOutcome, StepPolicy,
    StepReport,
};
