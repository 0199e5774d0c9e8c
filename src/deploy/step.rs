//! Pipeline steps and their outcomes.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

use super::runner::CommandRunner;

/// What a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// Refresh the template checkout.
    TemplateSync,
    /// Build the worker.
    Build,
    /// Deploy the worker.
    Deploy,
    /// Upload secrets.
    SecretSync,
}

impl StepKind {
    /// Policy the step runs under unless overridden.
    #[must_use]
    pub const fn default_policy(self) -> StepPolicy {
        match self {
            Self::Build | Self::Deploy => StepPolicy::Blocking,
            Self::TemplateSync | Self::SecretSync => StepPolicy::NonBlocking,
        }
    }

    /// Position among the ordered kinds; build, then deploy, then secret sync.
    #[must_use]
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::Build => Some(0),
            Self::Deploy => Some(1),
            Self::SecretSync => Some(2),
            Self::TemplateSync => None,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TemplateSync => "template-sync",
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::SecretSync => "secret-sync",
        };
        write!(f, "{s}")
    }
}

/// Whether a failure halts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepPolicy {
    /// Failure is fatal and cancels the remaining steps.
    Blocking,
    /// Failure is recorded as a warning.
    NonBlocking,
}

impl fmt::Display for StepPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => write!(f, "blocking"),
            Self::NonBlocking => write!(f, "non-blocking"),
        }
    }
}

/// What an action reports when it does not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action did its work.
    Done,
    /// A precondition was not met; nothing was done.
    Skipped(String),
}

/// The work behind a step. Implementations must be safe to re-run.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Performs the action.
    ///
    /// # Errors
    ///
    /// Returns the failure; the executor classifies it by the step's policy.
    async fn run(&self, runner: &dyn CommandRunner) -> Result<ActionOutcome>;
}

/// One step of the deployment pipeline.
pub struct PipelineStep {
    /// Display name.
    pub name: String,
    /// Step kind.
    pub kind: StepKind,
    /// Failure policy.
    pub policy: StepPolicy,
    /// The work.
    pub action: Box<dyn StepAction>,
}

impl PipelineStep {
    /// Creates a step with the kind's default policy.
    #[must_use]
    pub fn new(kind: StepKind, action: impl StepAction + 'static) -> Self {
        Self {
            name: kind.to_string(),
            kind,
            policy: kind.default_policy(),
            action: Box::new(action),
        }
    }

    /// Overrides the failure policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Terminal state of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    /// The step completed.
    Success,
    /// The step had nothing to do.
    Skipped {
        /// Why.
        reason: String,
    },
    /// The step failed.
    Failed {
        /// Failure message with causes.
        message: String,
    },
    /// Never run because an earlier blocking step failed.
    Cancelled,
}

impl StepOutcome {
    /// Short label for tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Step name.
    pub name: String,
    /// Step kind.
    pub kind: StepKind,
    /// Failure policy.
    pub policy: StepPolicy,
    /// Outcome.
    #[serde(flatten)]
    pub outcome: StepOutcome,
    /// Wall-clock time spent.
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(
    elapsed: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Step results in order.
    pub steps: Vec<StepReport>,
}

impl ExecutionReport {
    /// Returns true if no blocking step failed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.steps.iter().any(|s| {
            s.policy == StepPolicy::Blocking && matches!(s.outcome, StepOutcome::Failed { .. })
        })
    }

    /// Report of the named step.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Number of steps with the given outcome label.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.steps.iter().filter(|s| s.outcome.label() == label).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        assert_eq!(StepKind::Build.default_policy(), StepPolicy::Blocking);
        assert_eq!(StepKind::Deploy.default_policy(), StepPolicy::Blocking);
        assert_eq!(StepKind::TemplateSync.default_policy(), StepPolicy::NonBlocking);
        assert_eq!(StepKind::SecretSync.default_policy(), StepPolicy::NonBlocking);
    }

    #[test]
    fn test_step_report_json() {
        let report = StepReport {
            name: String::from("build"),
            kind: StepKind::Build,
            policy: StepPolicy::Blocking,
            outcome: StepOutcome::Skipped {
                reason: String::from("disabled"),
            },
            elapsed: Duration::from_millis(42),
        };
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "disabled");
        assert_eq!(json["elapsed_ms"], 42);
        assert_eq!(json["policy"], "blocking");
    }
}
