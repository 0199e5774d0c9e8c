//! The worker configuration document.
//!
//! A [`ConfigDocument`] owns the verbatim text of `wrangler.jsonc` together
//! with the span-annotated tree and the typed value derived from it. All
//! three are regenerated from the text whenever it changes, so they always
//! describe the same snapshot.

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, EdgeshipError, Result};

use super::jsonc::{self, Node};

/// A loaded configuration document.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    /// Where the document was read from, if anywhere.
    path: Option<PathBuf>,
    /// Verbatim text.
    text: String,
    /// Span-annotated tree.
    tree: Node,
    /// Typed view of the tree.
    value: Value,
    /// SHA-256 of the text.
    fingerprint: String,
}

/// Typed view of the fields the deployment reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerSettings {
    /// Worker name.
    pub name: String,
    /// Container-backed durable object classes.
    #[serde(default)]
    pub containers: Vec<ContainerSettings>,
    /// R2 bucket bindings.
    #[serde(default)]
    pub r2_buckets: Vec<BucketBinding>,
}

/// A container entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSettings {
    /// Durable object class served by the container.
    pub class_name: String,
    /// Container image or Dockerfile path.
    #[serde(default)]
    pub image: Option<String>,
    /// Upper bound on concurrently running instances.
    #[serde(default)]
    pub max_instances: Option<u32>,
}

/// An R2 bucket binding.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketBinding {
    /// Binding name exposed to the worker.
    pub binding: String,
    /// Bucket name on the account.
    pub bucket_name: String,
}

impl ConfigDocument {
    /// Loads a document from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or unparsable.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading worker configuration from: {}", path.display());

        if !path.exists() {
            return Err(EdgeshipError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let text = std::fs::read_to_string(path).map_err(|source| {
            EdgeshipError::Config(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        })?;

        let mut document = Self::parse(text, Some(path))?;
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Builds a document from text that does not live on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON with comments.
    pub fn from_text(text: impl Into<String>) -> Result<Self> {
        Self::parse(text.into(), None)
    }

    fn parse(text: String, source: Option<&Path>) -> Result<Self> {
        let tree = jsonc::parse(&text).map_err(|e| {
            let location = source.map_or_else(
                || format!("line {}, column {}", e.line, e.column),
                |p| format!("{}:{}:{}", p.display(), e.line, e.column),
            );
            EdgeshipError::Config(ConfigError::parse(e.message, Some(location)))
        })?;
        let value = tree.to_value();
        let fingerprint = fingerprint(&text);
        debug!("Parsed configuration snapshot {}", &fingerprint[..12]);

        Ok(Self {
            path: None,
            text,
            tree,
            value,
            fingerprint,
        })
    }

    /// Path the document was loaded from.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Verbatim text of the current snapshot.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Span-annotated tree of the current snapshot.
    #[must_use]
    pub const fn tree(&self) -> &Node {
        &self.tree
    }

    /// Untyped value of the current snapshot.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Fingerprint identifying the current snapshot.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Deserializes the fields the deployment needs.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not have the expected shape.
    pub fn worker_settings(&self) -> Result<WorkerSettings> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            EdgeshipError::Config(ConfigError::Schema {
                message: e.to_string(),
            })
        })
    }

    /// Replaces the text and regenerates the tree from it.
    ///
    /// Only the patcher rewrites documents.
    pub(crate) fn replace_text(&mut self, text: String) -> Result<()> {
        let mut next = Self::parse(text, self.path.as_deref())?;
        next.path = self.path.take();
        *self = next;
        Ok(())
    }
}

/// Computes the snapshot fingerprint of a text.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
