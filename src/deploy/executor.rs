//! Step executor for deployment pipelines.
//!
//! This module runs the ordered steps of a deployment. Each step declares a
//! policy: a blocking failure becomes the run's fatal error and cancels the
//! remaining steps, a non-blocking failure is recorded as a warning.

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::{EdgeshipError, Result, Severity};
use crate::report::{ErrorRecord, ErrorReporter};

use super::runner::CommandRunner;
use super::step::{
    ActionOutcome, ExecutionReport, PipelineStep, StepOutcome, StepPolicy, StepReport,
};

/// Executor for deployment steps.
#[derive(Clone)]
pub struct DeploymentExecutor {
    /// Process runner shared by every step.
    runner: Arc<dyn CommandRunner>,
}

impl DeploymentExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Checks that build, deploy and secret sync appear in that order.
    ///
    /// # Errors
    ///
    /// Returns an internal error naming the first misordered pair.
    pub fn validate(steps: &[PipelineStep]) -> Result<()> {
        let mut last: Option<&PipelineStep> = None;
        for step in steps {
            let Some(rank) = step.kind.rank() else {
                continue;
            };
            if let Some(previous) = last
                && previous.kind.rank().is_some_and(|r| r > rank)
            {
                return Err(EdgeshipError::internal(format!(
                    "Step '{}' must run before '{}'",
                    step.name, previous.name
                )));
            }
            last = Some(step);
        }
        Ok(())
    }

    /// Runs the steps in order, recording failures in `reporter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the step order is invalid; nothing runs then.
    pub async fn execute(
        &self,
        steps: Vec<PipelineStep>,
        reporter: &mut ErrorReporter,
    ) -> Result<ExecutionReport> {
        Self::validate(&steps)?;
        info!("Executing {} deployment step(s)", steps.len());

        let mut report = ExecutionReport::default();
        let mut halted = false;

        for step in steps {
            if halted {
                info!("Cancelled step '{}'", step.name);
                report.steps.push(StepReport {
                    name: step.name,
                    kind: step.kind,
                    policy: step.policy,
                    outcome: StepOutcome::Cancelled,
                    elapsed: std::time::Duration::ZERO,
                });
                continue;
            }

            let started = Instant::now();
            let result = step.action.run(self.runner.as_ref()).await;
            let elapsed = started.elapsed();

            let outcome = match result {
                Ok(ActionOutcome::Done) => {
                    info!("Step '{}' succeeded in {:.1?}", step.name, elapsed);
                    StepOutcome::Success
                }
                Ok(ActionOutcome::Skipped(reason)) => {
                    info!("Step '{}' skipped: {reason}", step.name);
                    StepOutcome::Skipped { reason }
                }
                Err(e) => {
                    let severity = match step.policy {
                        StepPolicy::Blocking => {
                            error!("Blocking step '{}' failed: {e}", step.name);
                            halted = true;
                            Severity::Fatal
                        }
                        StepPolicy::NonBlocking => {
                            warn!("Step '{}' failed, continuing: {e}", step.name);
                            Severity::Recoverable
                        }
                    };
                    reporter.record(&step.name, &e, severity);
                    let message = ErrorRecord::new(&step.name, &e, severity).full_message();
                    StepOutcome::Failed { message }
                }
            };

            report.steps.push(StepReport {
                name: step.name,
                kind: step.kind,
                policy: step.policy,
                outcome,
                elapsed,
            });
        }

        info!(
            "Deployment steps finished: {} succeeded, {} skipped, {} failed, {} cancelled",
            report.count("success"),
            report.count("skipped"),
            report.count("failed"),
            report.count("cancelled")
        );
        Ok(report)
    }
}
