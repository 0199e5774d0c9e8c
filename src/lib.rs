// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Edgeship
//!
//! Idempotent provisioning and deployment orchestration for Cloudflare
//! Worker projects.
//!
//! ## Overview
//!
//! A single run takes a Worker project from source to a live deployment:
//!
//! - Validate the required environment inputs before any side effect
//! - Ensure the R2 buckets and the AI Gateway the project needs exist
//! - Issue a scoped gateway credential when a gateway is first created
//! - Apply overrides to `wrangler.jsonc` without losing comments or layout
//! - Build, deploy and upload secrets, honoring each step's failure policy
//!
//! ## Architecture
//!
//! Every run is a fresh, stateless pass:
//!
//! 1. **Validate**: environment inputs are checked up front
//! 2. **Load**: the worker configuration is read once into a document
//! 3. **Provision and patch**: run concurrently, joined before deploying
//! 4. **Execute**: external steps run in order; blocking failures halt
//!
//! ## Modules
//!
//! - [`config`]: Environment inputs, pipeline settings and the JSONC document
//! - [`patch`]: Field paths and format-preserving edits
//! - [`cloudflare`]: Cloudflare API client
//! - [`provision`]: Control-plane seam and the provisioning pipeline
//! - [`deploy`]: Deployment steps, process runner and secrets file
//! - [`report`]: Error collection and rendering
//! - [`orchestrator`]: Wires a run together
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```text
//! CLOUDFLARE_API_TOKEN=... CLOUDFLARE_ACCOUNT_ID=... \
//! TEMPLATE_REPO_URL=https://github.com/acme/templates.git \
//! SANDBOX_INSTANCE_COUNT=25 edgeship deploy
//! ```

// ============================================================================
// Modules
// ============================================================================

mod atomic;
pub mod cli;
pub mod cloudflare;
pub mod config;
pub mod deploy;
pub mod error;
pub mod orchestrator;
pub mod patch;
pub mod provision;
pub mod report;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloudflare::CloudflareClient;
pub use config::{ConfigDocument, DeployEnv, EnvironmentValidator, PipelineSettings};
pub use deploy::{DeploymentExecutor, ProcessRunner};
pub use error::{EdgeshipError, Result};
pub use orchestrator::{Orchestrator, RunContext, RunOptions, RunSummary};
pub use patch::{ConfigPatcher, FieldPath};
pub use provision::{ControlPlane, ProvisioningPipeline};
pub use report::ErrorReporter;
