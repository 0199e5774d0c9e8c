//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::orchestrator::RunOptions;

/// Edgeship - Idempotent provisioning and deployment for Cloudflare Workers.
#[derive(Parser, Debug)]
#[command(name = "edgeship")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the pipeline settings file.
    #[arg(short, long, global = true, env = "EDGESHIP_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Provision resources, patch the worker configuration and deploy.
    Deploy {
        /// Leave the template checkout alone.
        #[arg(long)]
        skip_template_sync: bool,

        /// Deploy without building first.
        #[arg(long)]
        skip_build: bool,
    },

    /// Provision resources and apply overrides without deploying.
    Provision,

    /// Set one field of the worker configuration, keeping its formatting.
    Patch {
        /// Field path, e.g. `containers[class_name=Sandbox].max_instances`.
        path: String,

        /// New value; parsed as a JSON scalar, otherwise used as a string.
        value: String,
    },

    /// Generate the secrets file if it does not exist yet.
    Secrets,

    /// Validate the environment and the worker configuration.
    Check,
}

impl Commands {
    /// Run options for the commands that drive the orchestrator.
    #[must_use]
    pub const fn run_options(&self) -> Option<RunOptions> {
        match *self {
            Self::Deploy {
                skip_template_sync,
                skip_build,
            } => Some(RunOptions {
                provision_only: false,
                skip_template_sync,
                skip_build,
            }),
            Self::Provision => Some(RunOptions {
                provision_only: true,
                skip_template_sync: false,
                skip_build: false,
            }),
            Self::Patch { .. } | Self::Secrets | Self::Check => None,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
