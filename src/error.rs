//! Error types for the edgeship deployment system.
//!
//! This module provides the error hierarchy for every stage of a run:
//! environment validation, configuration loading, provisioning against the
//! control plane, document patching, and external process execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the edgeship deployment system.
#[derive(Debug, Error)]
pub enum EdgeshipError {
    /// Required inputs are missing or malformed.
    #[error("Environment validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration document or settings errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A remote resource could not be fetched or created.
    #[error("Failed to provision {kind} '{name}'")]
    Provision {
        /// Kind of the resource.
        kind: String,
        /// Logical name of the resource.
        name: String,
        /// Underlying control-plane failure.
        #[source]
        source: ApiError,
    },

    /// A scoped credential could not be issued.
    #[error("Failed to issue a scoped credential for gateway '{gateway}'")]
    Credential {
        /// Gateway the credential was requested for.
        gateway: String,
        /// Underlying control-plane failure.
        #[source]
        source: ApiError,
    },

    /// The gateway name exceeds the control-plane limit.
    #[error("Gateway name '{name}' is {len} characters long (limit is {max})")]
    GatewayNameTooLong {
        /// The rejected gateway name.
        name: String,
        /// Its length in characters.
        len: usize,
        /// The maximum accepted length.
        max: usize,
    },

    /// A document patch could not be computed or applied.
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// An external process failed.
    #[error("Step '{step}' failed")]
    Process {
        /// Name of the pipeline step.
        step: String,
        /// Underlying process failure.
        #[source]
        source: ProcessError,
    },

    /// The secrets file could not be generated or read.
    #[error("Failed to materialize secrets file {path}")]
    Secrets {
        /// Path to the secrets file.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised before any side effect, while checking inputs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// One or more required inputs are absent or empty.
    #[error("missing required inputs: {}", .names.join(", "))]
    MissingInputs {
        /// Every missing input name, in declaration order.
        names: Vec<String>,
    },

    /// An input is present but cannot be used.
    #[error("invalid value for {name}: {reason}")]
    InvalidInput {
        /// Name of the input.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be read.
    #[error("Failed to read {path}")]
    Read {
        /// Path to the unreadable file.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// The document parsed but does not have the expected shape.
    #[error("Unexpected configuration shape: {message}")]
    Schema {
        /// Description of the mismatch.
        message: String,
    },
}

/// Control-plane API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The API answered with an error status or an unsuccessful envelope.
    #[error("API request failed: {status} - {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// First error code reported by the API, if any.
        code: Option<u32>,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The operation is not supported for this resource kind.
    #[error("operation not supported: {message}")]
    Unsupported {
        /// Description of the unsupported request.
        message: String,
    },
}

/// Document patching errors.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The path expression could not be parsed.
    #[error("invalid field path '{path}': {reason}")]
    InvalidPath {
        /// The rejected path expression.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The path does not resolve to an existing field.
    #[error("field path '{path}' does not exist")]
    PathNotFound {
        /// The unresolved path.
        path: String,
    },

    /// A discriminator matched more than one array element.
    #[error("field path '{path}' matches {count} array entries")]
    AmbiguousMatch {
        /// The ambiguous path.
        path: String,
        /// Number of matching entries.
        count: usize,
    },

    /// The target or the replacement is not a scalar.
    #[error("field path '{path}' {reason}")]
    NotScalar {
        /// The offending path.
        path: String,
        /// What is not scalar.
        reason: String,
    },

    /// An edit was computed against a different document snapshot.
    #[error("edit for '{path}' was planned against snapshot {expected}, document is at {found}")]
    StaleSnapshot {
        /// Path of the stale edit.
        path: String,
        /// Snapshot the edit was planned against.
        expected: String,
        /// Current document snapshot.
        found: String,
    },

    /// Two edits in one batch touch the same bytes.
    #[error("edits for '{first}' and '{second}' overlap")]
    OverlappingEdits {
        /// First overlapping path.
        first: String,
        /// Second overlapping path.
        second: String,
    },

    /// The patched text no longer parses.
    #[error("patched document is invalid: {message}")]
    InvalidResult {
        /// Parser message.
        message: String,
    },
}

/// External process errors.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process could not be started.
    #[error("failed to start '{program}'")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully.
    #[error("'{program}' exited with {}{}", exit_label(.code), stderr_suffix(.stderr))]
    Exit {
        /// Program that failed.
        program: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Tail of the process' standard error.
        stderr: String,
    },
}

/// Severity of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Halts the run and fails the process.
    Fatal,
    /// Logged and tolerated.
    Recoverable,
}

/// Result type alias for edgeship operations.
pub type Result<T> = std::result::Result<T, EdgeshipError>;

/// Result type alias for control-plane calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| String::from("no exit code"), |c| format!("status {c}"))
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl EdgeshipError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ApiError {
    /// Creates a request error.
    #[must_use]
    pub fn request(status: u16, code: Option<u32>, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            code,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NetworkError { .. })
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::NetworkError { .. } => Some(1),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a parse error with an optional location.
    #[must_use]
    pub fn parse(message: impl Into<String>, location: Option<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location,
        }
    }
}
