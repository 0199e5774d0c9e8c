//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::json;
use std::fmt::Write;
use std::path::Path;
use tabled::{Table, Tabled};
use uuid::Uuid;

use crate::config::{DeployEnv, PipelineSettings, WorkerSettings};
use crate::deploy::{StepOutcome, StepPolicy, StepReport};
use crate::orchestrator::RunSummary;
use crate::patch::PatchOutcome;
use crate::provision::{ProvisionOutcome, ResourceReport};
use crate::report::ErrorReporter;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "ID")]
    id: String,
}

/// Step row for table display.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    name: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Time")]
    elapsed: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of an orchestrated run.
    ///
    /// JSON output embeds the error report; text output leaves it to
    /// [`Self::format_report`].
    #[must_use]
    pub fn format_summary(&self, run_id: Uuid, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Json => {
                let provision = summary.provision.as_ref();
                let value = json!({
                    "run_id": run_id,
                    "success": summary.exit_code() == 0,
                    "resources": provision.map_or(&[][..], |p| p.resources.as_slice()),
                    "gateway_url": provision.and_then(|p| p.gateway_url.as_deref()),
                    "credential_issued": provision.is_some_and(|p| p.credential.is_some()),
                    "patch": summary.patch.as_ref().map(Self::patch_json),
                    "steps": summary.execution.as_ref().map_or(&[][..], |e| e.steps.as_slice()),
                    "fatal": summary.reporter.fatal(),
                    "warnings": summary.reporter.warnings(),
                });
                serde_json::to_string_pretty(&value).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_summary_text(run_id, summary),
        }
    }

    /// Formats a run summary as text.
    fn format_summary_text(run_id: Uuid, summary: &RunSummary) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "\nRun {}", run_id.to_string().dimmed());

        if let Some(provision) = &summary.provision {
            let _ = writeln!(output, "\nResources ({} created)", provision.created_count());
            let rows: Vec<ResourceRow> = provision.resources.iter().map(Self::resource_row).collect();
            if rows.is_empty() {
                let _ = writeln!(output, "   (none declared)");
            } else {
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
            }
            if let Some(url) = &provision.gateway_url {
                let _ = writeln!(output, "Gateway endpoint: {url}");
            }
            if provision.credential.is_some() {
                let _ = writeln!(output, "Scoped gateway credential: {}", "issued".green());
            }
        }

        if let Some(patch) = &summary.patch {
            let _ = writeln!(output, "\nInstance count: {}", Self::describe_patch(patch));
        }

        if let Some(execution) = &summary.execution {
            let _ = writeln!(output, "\nDeployment steps");
            let rows: Vec<StepRow> = execution
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| Self::step_row(i + 1, step))
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let status = if summary.exit_code() == 0 {
            "succeeded".green()
        } else {
            "failed".red()
        };
        let _ = writeln!(output, "\nRun {status}");
        output
    }

    /// Formats the error report.
    #[must_use]
    pub fn format_report(&self, reporter: &ErrorReporter) -> String {
        match self.format {
            OutputFormat::Json => reporter.render_json(),
            OutputFormat::Text => reporter.render_text(),
        }
    }

    /// The error report for stderr, if there is anything to report.
    /// Emitted in both formats, so JSON consumers reading only stderr still
    /// see failures.
    #[must_use]
    pub fn diagnostics(&self, reporter: &ErrorReporter) -> Option<String> {
        (reporter.has_fatal() || !reporter.warnings().is_empty())
            .then(|| self.format_report(reporter).trim_end().to_string())
    }

    /// Formats the result of a single field patch.
    #[must_use]
    pub fn format_patch(&self, path: &str, outcome: &PatchOutcome) -> String {
        match self.format {
            OutputFormat::Json => {
                let mut value = Self::patch_json(outcome);
                value["path"] = json!(path);
                serde_json::to_string_pretty(&value).unwrap_or_default()
            }
            OutputFormat::Text => format!("{path}: {}\n", Self::describe_patch(outcome)),
        }
    }

    /// Formats the result of secrets file generation.
    #[must_use]
    pub fn format_secrets(&self, path: &Path, generated: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "path": path,
                "generated": generated,
            }))
            .unwrap_or_default(),
            OutputFormat::Text if generated => {
                format!("{} Generated {}\n", "✓".green(), path.display())
            }
            OutputFormat::Text => format!("{} already exists, left untouched\n", path.display()),
        }
    }

    /// Formats the result of a configuration check.
    #[must_use]
    pub fn format_check(
        &self,
        settings: &PipelineSettings,
        worker: &WorkerSettings,
        env: &DeployEnv,
    ) -> String {
        let buckets: Vec<&str> = worker
            .r2_buckets
            .iter()
            .map(|b| b.bucket_name.as_str())
            .collect();
        let sandbox = worker
            .containers
            .iter()
            .find(|c| c.class_name == settings.sandbox_class);

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "worker_config": settings.worker_config,
                "worker": worker.name,
                "containers": worker.containers.len(),
                "buckets": buckets,
                "gateway": env.gateway_name,
                "max_instances": sandbox.and_then(|c| c.max_instances),
                "instance_count_override": env.instance_count,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "{} Configuration is valid!", "✓".green());
                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "  File: {}", settings.worker_config.display());
                let _ = writeln!(output, "  Worker: {}", worker.name);
                let _ = writeln!(output, "  Containers: {}", worker.containers.len());
                let _ = writeln!(output, "  Buckets: {}", Self::list(&buckets));
                let _ = writeln!(
                    output,
                    "  Gateway: {}",
                    env.gateway_name.as_deref().unwrap_or("-")
                );
                match (sandbox.and_then(|c| c.max_instances), env.instance_count) {
                    (Some(current), Some(wanted)) if current != wanted => {
                        let _ = writeln!(
                            output,
                            "  {} instances: {current} -> {}",
                            settings.sandbox_class,
                            wanted.to_string().yellow()
                        );
                    }
                    (Some(current), _) => {
                        let _ = writeln!(output, "  {} instances: {current}", settings.sandbox_class);
                    }
                    (None, _) => {
                        let _ = writeln!(
                            output,
                            "  {} {} has no {} field",
                            "⚠".yellow(),
                            settings.sandbox_class,
                            settings.instance_field
                        );
                    }
                }
                output
            }
        }
    }

    fn resource_row(resource: &ResourceReport) -> ResourceRow {
        ResourceRow {
            kind: resource.kind.to_string(),
            name: resource.name.clone(),
            outcome: Self::format_resource_outcome(&resource.outcome),
            id: resource.remote_id.clone().unwrap_or_else(|| String::from("-")),
        }
    }

    fn step_row(index: usize, step: &StepReport) -> StepRow {
        StepRow {
            index,
            name: step.name.clone(),
            policy: match step.policy {
                StepPolicy::Blocking => String::from("blocking"),
                StepPolicy::NonBlocking => String::from("non-blocking"),
            },
            outcome: Self::format_step_outcome(&step.outcome),
            elapsed: format!("{:.1}s", step.elapsed.as_secs_f64()),
        }
    }

    /// Formats a resource outcome with color.
    fn format_resource_outcome(outcome: &ProvisionOutcome) -> String {
        match outcome {
            ProvisionOutcome::Existing => "existing".to_string(),
            ProvisionOutcome::Created => "created".green().to_string(),
            ProvisionOutcome::Skipped { reason } => {
                format!("{} ({})", "skipped".yellow(), Self::truncate(reason, 40))
            }
            ProvisionOutcome::Failed => "failed".red().to_string(),
        }
    }

    /// Formats a step outcome with color.
    fn format_step_outcome(outcome: &StepOutcome) -> String {
        match outcome {
            StepOutcome::Success => "success".green().to_string(),
            StepOutcome::Skipped { reason } => {
                format!("{} ({})", "skipped".yellow(), Self::truncate(reason, 40))
            }
            StepOutcome::Failed { .. } => "failed".red().to_string(),
            StepOutcome::Cancelled => "cancelled".dimmed().to_string(),
        }
    }

    fn describe_patch(outcome: &PatchOutcome) -> String {
        match outcome {
            PatchOutcome::Unchanged => "unchanged".to_string(),
            PatchOutcome::Changed { previous, current } => {
                format!("{previous} -> {}", current.green())
            }
        }
    }

    fn patch_json(outcome: &PatchOutcome) -> serde_json::Value {
        match outcome {
            PatchOutcome::Unchanged => json!({ "changed": false }),
            PatchOutcome::Changed { previous, current } => json!({
                "changed": true,
                "previous": previous,
                "current": current,
            }),
        }
    }

    fn list(items: &[&str]) -> String {
        if items.is_empty() {
            String::from("-")
        } else {
            items.join(", ")
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{ExecutionReport, StepKind};
    use crate::provision::{ProvisionReport, ResourceKind};
    use std::time::Duration;

    fn summary() -> RunSummary {
        RunSummary {
            provision: Some(ProvisionReport {
                resources: vec![ResourceReport {
                    kind: ResourceKind::Namespace,
                    name: String::from("assets"),
                    outcome: ProvisionOutcome::Created,
                    remote_id: None,
                }],
                gateway_url: Some(String::from("https://gateway.example/acme-gw")),
                ..ProvisionReport::default()
            }),
            patch: Some(PatchOutcome::Changed {
                previous: String::from("10"),
                current: String::from("25"),
            }),
            execution: Some(ExecutionReport {
                steps: vec![StepReport {
                    name: String::from("build"),
                    kind: StepKind::Build,
                    policy: StepPolicy::Blocking,
                    outcome: StepOutcome::Success,
                    elapsed: Duration::from_millis(1500),
                }],
            }),
            reporter: ErrorReporter::new(),
        }
    }

    #[test]
    fn test_summary_text_lists_resources_and_steps() {
        let text = OutputFormatter::new(OutputFormat::Text).format_summary(Uuid::nil(), &summary());
        assert!(text.contains("assets"));
        assert!(text.contains("https://gateway.example/acme-gw"));
        assert!(text.contains("build"));
        assert!(text.contains("1.5s"));
    }

    #[test]
    fn test_summary_json_is_machine_readable() {
        let json = OutputFormatter::new(OutputFormat::Json).format_summary(Uuid::nil(), &summary());
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["success"], true);
        assert_eq!(value["resources"][0]["outcome"]["status"], "created");
        assert_eq!(value["patch"]["current"], "25");
        assert_eq!(value["steps"][0]["status"], "success");
        assert_eq!(value["steps"][0]["elapsed_ms"], 1500);
        assert_eq!(value["credential_issued"], false);
    }

    #[test]
    fn test_diagnostics_in_both_formats() {
        let quiet = ErrorReporter::new();
        assert_eq!(OutputFormatter::new(OutputFormat::Json).diagnostics(&quiet), None);

        let mut reporter = ErrorReporter::new();
        reporter.record_warning("provision", &std::io::Error::other("gateway unreachable"));

        let json = OutputFormatter::new(OutputFormat::Json)
            .diagnostics(&reporter)
            .expect("warnings are reported");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["success"], true);
        assert_eq!(value["warnings"][0]["stage"], "provision");

        let text = OutputFormatter::new(OutputFormat::Text)
            .diagnostics(&reporter)
            .expect("warnings are reported");
        assert!(text.contains("gateway unreachable"));
    }

    #[test]
    fn test_patch_json_includes_path() {
        let json = OutputFormatter::new(OutputFormat::Json)
            .format_patch("vars.MODE", &PatchOutcome::Unchanged);
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["path"], "vars.MODE");
        assert_eq!(value["changed"], false);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("short", 40), "short");
        assert_eq!(OutputFormatter::truncate("ééééééé", 5), "éé...");
    }
}
