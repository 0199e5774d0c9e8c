//! Error aggregation and the final diagnostic block.
//!
//! The reporter keeps the first fatal error of a run together with its full
//! cause chain, plus every recoverable warning, and decides the exit status.

use colored::Colorize;
use serde::Serialize;
use std::error::Error;
use std::fmt::Write;
use tracing::debug;

use crate::error::Severity;

/// Generic guidance printed after a failed run.
const TROUBLESHOOTING: &[&str] = &[
    "Check that CLOUDFLARE_API_TOKEN is valid and can edit Workers, R2 and AI Gateway",
    "Check that CLOUDFLARE_ACCOUNT_ID names the account the token belongs to",
    "Re-run with --verbose for step-by-step logs",
    "Runs are idempotent: fix the cause and run the same command again",
];

/// Collects the messages of an error's source chain, outermost excluded.
#[must_use]
pub fn error_chain(error: &(dyn Error + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    /// Stage the failure happened in.
    pub stage: String,
    /// Top-level message.
    pub message: String,
    /// Underlying causes, outermost first.
    pub causes: Vec<String>,
    /// Classification.
    pub severity: Severity,
}

impl ErrorRecord {
    /// Builds a record from an error and its source chain.
    #[must_use]
    pub fn new(stage: impl Into<String>, error: &(dyn Error + 'static), severity: Severity) -> Self {
        Self {
            stage: stage.into(),
            message: error.to_string(),
            causes: error_chain(error),
            severity,
        }
    }

    /// Message followed by every cause.
    #[must_use]
    pub fn full_message(&self) -> String {
        std::iter::once(self.message.as_str())
            .chain(self.causes.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(": ")
    }
}

/// Aggregates failures for one run.
#[derive(Debug, Default, Clone)]
pub struct ErrorReporter {
    fatal: Option<ErrorRecord>,
    warnings: Vec<ErrorRecord>,
}

#[derive(Serialize)]
struct ReportJson<'a> {
    success: bool,
    fatal: Option<&'a ErrorRecord>,
    warnings: &'a [ErrorRecord],
}

impl ErrorReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fatal: None,
            warnings: Vec::new(),
        }
    }

    /// Records an error with an explicit severity.
    pub fn record(&mut self, stage: &str, error: &(dyn Error + 'static), severity: Severity) {
        match severity {
            Severity::Fatal => self.record_fatal(stage, error),
            Severity::Recoverable => self.record_warning(stage, error),
        }
    }

    /// Records a fatal error. Only the first one is kept.
    pub fn record_fatal(&mut self, stage: &str, error: &(dyn Error + 'static)) {
        if self.fatal.is_some() {
            debug!("Ignoring later fatal error in {stage}: {error}");
            return;
        }
        self.fatal = Some(ErrorRecord::new(stage, error, Severity::Fatal));
    }

    /// Records a recoverable warning.
    pub fn record_warning(&mut self, stage: &str, error: &(dyn Error + 'static)) {
        self.warnings
            .push(ErrorRecord::new(stage, error, Severity::Recoverable));
    }

    /// The fatal error, if any.
    #[must_use]
    pub const fn fatal(&self) -> Option<&ErrorRecord> {
        self.fatal.as_ref()
    }

    /// Recorded warnings in order.
    #[must_use]
    pub fn warnings(&self) -> &[ErrorRecord] {
        &self.warnings
    }

    /// Returns true if a fatal error was recorded.
    #[must_use]
    pub const fn has_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// Process exit code: non-zero iff a fatal error occurred.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.has_fatal() { 1 } else { 0 }
    }

    /// Renders the diagnostic block for a terminal.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut output = String::new();

        if let Some(fatal) = &self.fatal {
            let _ = writeln!(
                output,
                "\n{} Run failed during {}",
                "✗".red(),
                fatal.stage.bold()
            );
            let _ = writeln!(output, "   {}", fatal.message);
            for cause in &fatal.causes {
                let _ = writeln!(output, "   {} {cause}", "caused by:".dimmed());
            }
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(output, "\n{} Warnings ({}):", "⚠".yellow(), self.warnings.len());
            for warning in &self.warnings {
                let _ = writeln!(output, "   - [{}] {}", warning.stage, warning.full_message());
            }
        }

        if self.has_fatal() {
            output.push_str("\nTroubleshooting:\n");
            for hint in TROUBLESHOOTING {
                let _ = writeln!(output, "   - {hint}");
            }
        }

        output
    }

    /// Renders the report as JSON.
    #[must_use]
    pub fn render_json(&self) -> String {
        let report = ReportJson {
            success: !self.has_fatal(),
            fatal: self.fatal.as_ref(),
            warnings: &self.warnings,
        };
        serde_json::to_string_pretty(&report).unwrap_or_default()
    }
}
