//! Edgeship CLI entrypoint.
//!
//! This is the main entrypoint for the edgeship command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use edgeship::cli::{Cli, Commands, OutputFormatter};
use edgeship::cloudflare::CloudflareClient;
use edgeship::config::env::SECRET_ALLOW_LIST;
use edgeship::config::{
    find_settings_file, ConfigDocument, EnvironmentValidator, PipelineSettings, SettingsLoader,
};
use edgeship::deploy::{materialize, ProcessRunner};
use edgeship::error::{EdgeshipError, Result};
use edgeship::orchestrator::{Orchestrator, RunContext, RunOptions};
use edgeship::patch::{parse_scalar, ConfigPatcher, FieldPath};
use edgeship::report::ErrorReporter;

use clap::Parser;
use tracing::{debug, info_span, Instrument};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    ExitCode::from(runtime.block_on(run(cli)))
}

/// Initializes the logging system. `RUST_LOG` overrides the level.
fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> u8 {
    let formatter = OutputFormatter::new(cli.output);
    let settings = cli.settings.as_deref();

    let result = match &cli.command {
        Commands::Deploy { .. } | Commands::Provision => {
            let options = cli.command.run_options().unwrap_or_default();
            return cmd_run(settings, options, &formatter).await;
        }
        Commands::Patch { path, value } => cmd_patch(settings, path, value, &formatter).await,
        Commands::Secrets => cmd_secrets(settings, &formatter).await,
        Commands::Check => cmd_check(settings, &formatter),
    };

    let mut reporter = ErrorReporter::new();
    if let Err((stage, e)) = result {
        reporter.record_fatal(stage, &e);
    }
    finish(&formatter, &reporter)
}

/// Prints the error report to stderr, if there is anything to report.
fn finish(formatter: &OutputFormatter, reporter: &ErrorReporter) -> u8 {
    if let Some(report) = formatter.diagnostics(reporter) {
        eprintln!("{report}");
    }
    reporter.exit_code()
}

/// A failure outside the orchestrator, tagged with the stage it hit.
type Staged<T> = std::result::Result<T, (&'static str, EdgeshipError)>;

fn at<T>(stage: &'static str, result: Result<T>) -> Staged<T> {
    result.map_err(|e| (stage, e))
}

/// Full or provisioning-only run.
async fn cmd_run(
    settings_path: Option<&Path>,
    options: RunOptions,
    formatter: &OutputFormatter,
) -> u8 {
    let prepared = at("settings", load_settings(settings_path)).and_then(|settings| {
        let env = at("validate", EnvironmentValidator::new().validate())?;
        let client = CloudflareClient::new(&env.api_token, &env.account_id).map_err(|e| {
            (
                "validate",
                EdgeshipError::internal(format!("Failed to create API client: {e}")),
            )
        })?;
        Ok((RunContext::new(env, settings, options), client))
    });

    let (ctx, client) = match prepared {
        Ok(prepared) => prepared,
        Err((stage, e)) => {
            let mut reporter = ErrorReporter::new();
            reporter.record_fatal(stage, &e);
            return finish(formatter, &reporter);
        }
    };

    let orchestrator = Orchestrator::new(Arc::new(client), Arc::new(ProcessRunner));
    let span = info_span!("run", run_id = %ctx.run_id);
    let summary = orchestrator.run(&ctx).instrument(span).await;

    println!("{}", formatter.format_summary(ctx.run_id, &summary));
    finish(formatter, &summary.reporter)
}

/// Sets one field of the worker configuration.
async fn cmd_patch(
    settings_path: Option<&Path>,
    path: &str,
    value: &str,
    formatter: &OutputFormatter,
) -> Staged<()> {
    let settings = at("settings", load_settings(settings_path))?;
    let mut document = at("load", ConfigDocument::load(&settings.worker_config))?;
    let field = at("patch", FieldPath::parse(path).map_err(EdgeshipError::from))?;

    let patcher = ConfigPatcher::new();
    let outcome = at("patch", patcher.set(&mut document, &field, parse_scalar(value)))?;
    if outcome.is_changed() {
        at("patch", patcher.persist(&document).await)?;
    }

    print!("{}", formatter.format_patch(path, &outcome));
    Ok(())
}

/// Generates the secrets file if missing.
async fn cmd_secrets(settings_path: Option<&Path>, formatter: &OutputFormatter) -> Staged<()> {
    let settings = at("settings", load_settings(settings_path))?;
    let env = at(
        "validate",
        EnvironmentValidator::with_required(Vec::<String>::new()).validate(),
    )?;

    let generated = at(
        "secrets",
        materialize(&settings.secrets_file, &env.secrets, SECRET_ALLOW_LIST).await,
    )?;
    print!("{}", formatter.format_secrets(&settings.secrets_file, generated));
    Ok(())
}

/// Validates the environment and the worker configuration.
fn cmd_check(settings_path: Option<&Path>, formatter: &OutputFormatter) -> Staged<()> {
    let settings = at("settings", load_settings(settings_path))?;
    let env = at("validate", EnvironmentValidator::new().validate())?;
    let document = at("load", ConfigDocument::load(&settings.worker_config))?;
    let worker = at("load", document.worker_settings())?;

    print!("{}", formatter.format_check(&settings, &worker, &env));
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves and loads pipeline settings, then the `.env` next to them.
fn load_settings(settings_path: Option<&Path>) -> Result<PipelineSettings> {
    let settings_file = settings_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok().and_then(find_settings_file));
    let base = settings_file
        .as_deref()
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    debug!("Resolving pipeline paths against {}", base.display());

    let loader = SettingsLoader::new().with_base_path(base);
    loader.load_dotenv()?;
    loader.load_or_default(settings_file.as_deref())
}
