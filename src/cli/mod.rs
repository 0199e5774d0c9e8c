//! CLI module for the edgeship deployment tool.
//!
//! This module provides the command-line interface for provisioning and
//! deploying Cloudflare Worker projects.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
