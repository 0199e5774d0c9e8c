//! Configuration module for the edgeship deployment system.
//!
//! This module handles all configuration-related functionality:
//! - Validating environment inputs before any side effect
//! - Loading the comment-bearing worker configuration document
//! - Loading optional pipeline settings from `edgeship.yaml`

mod document;
pub mod env;
pub mod jsonc;
mod settings;

pub use document::{
    fingerprint, BucketBinding, ConfigDocument, ContainerSettings, WorkerSettings,
};
pub use env::{is_placeholder, DeployEnv, EnvironmentValidator};
pub use settings::{
    find_settings_file, CommandSettings, PipelineSettings, SettingsLoader, DEFAULT_SETTINGS_FILES,
};
