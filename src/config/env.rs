//! Environment inputs and their validation.
//!
//! Every environment read of a run happens here, once, before anything
//! touches the network or the filesystem. The result is a [`DeployEnv`] that
//! is handed to every component that needs an input.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::{EdgeshipError, Result, ValidationError};

/// API token used for control-plane calls and deploys.
pub const API_TOKEN: &str = "CLOUDFLARE_API_TOKEN";
/// Account every resource lives in.
pub const ACCOUNT_ID: &str = "CLOUDFLARE_ACCOUNT_ID";
/// Location of the template repository.
pub const TEMPLATE_REPO: &str = "TEMPLATE_REPO_URL";
/// Name of the AI gateway to provision.
pub const GATEWAY_NAME: &str = "AI_GATEWAY_NAME";
/// Gateway endpoint URL.
pub const GATEWAY_URL: &str = "AI_GATEWAY_URL";
/// Gateway authentication token.
pub const GATEWAY_TOKEN: &str = "AI_GATEWAY_TOKEN";
/// Override for the sandbox container instance count.
pub const INSTANCE_COUNT: &str = "SANDBOX_INSTANCE_COUNT";

/// Inputs that must be present for any run.
pub const REQUIRED_INPUTS: &[&str] = &[API_TOKEN, ACCOUNT_ID, TEMPLATE_REPO];

/// Variables copied into a generated secrets file.
pub const SECRET_ALLOW_LIST: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    GATEWAY_URL,
    GATEWAY_TOKEN,
    "GITHUB_TOKEN",
    "SESSION_SECRET",
];

/// Value prefixes that mark a value as an unfilled template placeholder.
pub const PLACEHOLDER_PREFIXES: &[&str] = &[
    "your-",
    "your_",
    "<",
    "changeme",
    "change-me",
    "placeholder",
    "replace-me",
    "xxx",
];

/// Returns true if the value is a template placeholder rather than a secret.
#[must_use]
pub fn is_placeholder(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    PLACEHOLDER_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// Validated inputs for one run.
#[derive(Clone, Default)]
pub struct DeployEnv {
    /// Control-plane API token.
    pub api_token: String,
    /// Target account identifier.
    pub account_id: String,
    /// Template repository location.
    pub template_repo: String,
    /// Gateway name, if a gateway should be provisioned.
    pub gateway_name: Option<String>,
    /// Gateway URL, if already known.
    pub gateway_url: Option<String>,
    /// Gateway token, if already configured.
    pub gateway_token: Option<String>,
    /// Sandbox instance count override.
    pub instance_count: Option<u32>,
    /// Values of the secret allow-list that are set.
    pub secrets: BTreeMap<String, String>,
}

impl fmt::Debug for DeployEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployEnv")
            .field("api_token", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("template_repo", &self.template_repo)
            .field("gateway_name", &self.gateway_name)
            .field("gateway_url", &self.gateway_url)
            .field("gateway_token", &self.gateway_token.as_ref().map(|_| "<redacted>"))
            .field("instance_count", &self.instance_count)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DeployEnv {
    /// Returns the configured gateway token if it is usable.
    #[must_use]
    pub fn usable_gateway_token(&self) -> Option<&str> {
        self.gateway_token
            .as_deref()
            .filter(|token| !is_placeholder(token))
    }
}

/// Checks that every required input is present.
#[derive(Debug, Clone)]
pub struct EnvironmentValidator {
    /// Names that must resolve to non-empty values.
    required: Vec<String>,
}

impl Default for EnvironmentValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentValidator {
    /// Creates a validator for the standard required inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::with_required(REQUIRED_INPUTS.iter().copied())
    }

    /// Creates a validator for a custom set of required inputs.
    #[must_use]
    pub fn with_required<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Validates against the process environment.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing every missing input.
    pub fn validate(&self) -> Result<DeployEnv> {
        self.validate_with(|name| std::env::var(name).ok())
    }

    /// Validates against an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing every missing input, or naming the
    /// first malformed optional input.
    pub fn validate_with<F>(&self, lookup: F) -> Result<DeployEnv>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|name| read(name.as_str()).is_none())
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(EdgeshipError::Validation(ValidationError::MissingInputs {
                names: missing,
            }));
        }

        let instance_count = read(INSTANCE_COUNT)
            .map(|raw| parse_instance_count(&raw))
            .transpose()?;

        let secrets = SECRET_ALLOW_LIST
            .iter()
            .filter_map(|name| read(*name).map(|value| ((*name).to_string(), value)))
            .collect();

        let env = DeployEnv {
            api_token: read(API_TOKEN).unwrap_or_default(),
            account_id: read(ACCOUNT_ID).unwrap_or_default(),
            template_repo: read(TEMPLATE_REPO).unwrap_or_default(),
            gateway_name: read(GATEWAY_NAME),
            gateway_url: read(GATEWAY_URL),
            gateway_token: read(GATEWAY_TOKEN),
            instance_count,
            secrets,
        };

        debug!("Environment validated: {env:?}");
        Ok(env)
    }
}

fn parse_instance_count(raw: &str) -> Result<u32> {
    match raw.parse::<u32>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(EdgeshipError::Validation(ValidationError::InvalidInput {
            name: INSTANCE_COUNT.to_string(),
            reason: format!("expected a positive integer, got '{raw}'"),
        })),
    }
}
