//! Pipeline settings for loading and locating `edgeship.yaml`.
//!
//! The settings file is optional. It names the files a run works on and the
//! external commands each deployment step invokes; every field has a default
//! matching a stock Worker project.

use crate::error::{ConfigError, EdgeshipError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default settings file names to search for.
pub const DEFAULT_SETTINGS_FILES: &[&str] = &["edgeship.yaml", "edgeship.yml"];

/// Settings for one deployment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Worker configuration document.
    pub worker_config: PathBuf,
    /// Secrets file consumed by the bulk upload.
    pub secrets_file: PathBuf,
    /// Checkout directory of the template repository.
    pub templates_dir: PathBuf,
    /// Container class whose instance count can be overridden.
    pub sandbox_class: String,
    /// Field holding the instance count inside the container entry.
    pub instance_field: String,
    /// External commands.
    pub commands: CommandSettings,
}

/// Commands run by the deployment steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandSettings {
    /// Build command.
    pub build: Vec<String>,
    /// Remote deploy command.
    pub deploy: Vec<String>,
    /// Bulk secret upload command; the secrets file path is appended.
    pub secret_sync: Vec<String>,
    /// Source-control program used for template sync.
    pub git: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_config: PathBuf::from("wrangler.jsonc"),
            secrets_file: PathBuf::from(".dev.vars"),
            templates_dir: PathBuf::from("templates"),
            sandbox_class: String::from("Sandbox"),
            instance_field: String::from("max_instances"),
            commands: CommandSettings::default(),
        }
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            build: words(&["npm", "run", "build"]),
            deploy: words(&["npx", "wrangler", "deploy"]),
            secret_sync: words(&["npx", "wrangler", "secret", "bulk"]),
            git: String::from("git"),
        }
    }
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl PipelineSettings {
    /// Field path of the sandbox instance count in the worker configuration.
    #[must_use]
    pub fn instance_count_path(&self) -> String {
        format!(
            "containers[class_name={}].{}",
            self.sandbox_class, self.instance_field
        )
    }

    /// Resolves every relative path against a base directory.
    #[must_use]
    pub fn resolved_against(mut self, base: &Path) -> Self {
        for path in [
            &mut self.worker_config,
            &mut self.secrets_file,
            &mut self.templates_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

/// Settings loader.
#[derive(Debug, Default)]
pub struct SettingsLoader {
    /// Base path for resolving relative paths and `.env`.
    base_path: Option<PathBuf>,
}

impl SettingsLoader {
    /// Creates a new settings loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<PipelineSettings> {
        let path = path.as_ref();
        info!("Loading pipeline settings from: {}", path.display());

        if !path.exists() {
            return Err(EdgeshipError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|source| {
            EdgeshipError::Config(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<PipelineSettings> {
        debug!("Parsing YAML settings");

        // An empty file means "all defaults".
        if content.trim().is_empty() {
            return Ok(self.resolve(PipelineSettings::default()));
        }

        let settings: PipelineSettings = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            EdgeshipError::Config(ConfigError::parse(format!("YAML parse error: {e}"), location))
        })?;

        Ok(self.resolve(settings))
    }

    /// Loads the settings file if one exists, otherwise the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(&self, path: Option<&Path>) -> Result<PipelineSettings> {
        match path {
            Some(path) => self.load_file(path),
            None => {
                debug!("No settings file, using defaults");
                Ok(self.resolve(PipelineSettings::default()))
            }
        }
    }

    fn resolve(&self, settings: PipelineSettings) -> PipelineSettings {
        match &self.base_path {
            Some(base) => settings.resolved_against(base),
            None => settings,
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                EdgeshipError::Config(ConfigError::parse(
                    format!("Failed to load .env file: {e}"),
                    Some(env_path.display().to_string()),
                ))
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Finds the settings file in the given directory or its parents.
#[must_use]
pub fn find_settings_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref().to_path_buf();

    loop {
        for filename in DEFAULT_SETTINGS_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found settings file: {}", candidate.display());
                return Some(candidate);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}
