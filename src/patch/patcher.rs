//! Format-preserving edits of single scalar fields.
//!
//! The worker configuration is maintained by hand, so edits replace only
//! the bytes of the addressed value. Comments, spacing and member order
//! elsewhere in the document are left untouched.

use serde_json::Value;
use std::ops::Range;
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::config::{jsonc, ConfigDocument};
use crate::error::{EdgeshipError, PatchError, Result};

use super::path::FieldPath;

/// A planned replacement of one scalar value.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOperation {
    /// Addressed field.
    pub path: FieldPath,
    /// New value.
    pub value: Value,
    /// Bytes of the current value in the planning snapshot.
    pub range: Range<usize>,
    /// Rendered replacement text.
    pub replacement: String,
    /// Fingerprint of the snapshot `range` refers to.
    pub snapshot: String,
}

/// Outcome of setting one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The field already held the requested value.
    Unchanged,
    /// The field was rewritten.
    Changed {
        /// Previous value text.
        previous: String,
        /// New value text.
        current: String,
    },
}

impl PatchOutcome {
    /// Returns true if the document text changed.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Computes and applies in-place edits.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigPatcher;

impl ConfigPatcher {
    /// Creates a new patcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Locates the field and prepares an edit against the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve to an existing scalar or
    /// if the new value is not a scalar.
    pub fn plan(&self, document: &ConfigDocument, path: &FieldPath, value: Value) -> Result<EditOperation> {
        if matches!(value, Value::Object(_) | Value::Array(_)) {
            return Err(PatchError::NotScalar {
                path: path.to_string(),
                reason: String::from("cannot be set to an object or array"),
            }
            .into());
        }

        let node = path.resolve(document.tree())?;
        if !node.is_scalar() {
            return Err(PatchError::NotScalar {
                path: path.to_string(),
                reason: String::from("addresses an object or array"),
            }
            .into());
        }

        let replacement = serde_json::to_string(&value)
            .map_err(|e| EdgeshipError::internal(format!("Failed to render value: {e}")))?;

        Ok(EditOperation {
            path: path.clone(),
            value,
            range: node.span.clone(),
            replacement,
            snapshot: document.fingerprint().to_string(),
        })
    }

    /// Applies a batch of edits planned against the document's current
    /// snapshot and returns the new text.
    ///
    /// Edits are applied from the highest offset down so that earlier ranges
    /// stay valid. The document's tree is regenerated from the new text.
    ///
    /// # Errors
    ///
    /// Returns an error if an edit is stale, two edits overlap, or the
    /// result no longer parses. The document is unchanged on error.
    pub fn apply(&self, document: &mut ConfigDocument, mut edits: Vec<EditOperation>) -> Result<String> {
        for edit in &edits {
            if edit.snapshot != document.fingerprint() {
                return Err(PatchError::StaleSnapshot {
                    path: edit.path.to_string(),
                    expected: short(&edit.snapshot),
                    found: short(document.fingerprint()),
                }
                .into());
            }
        }

        edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));
        for pair in edits.windows(2) {
            let (higher, lower) = (&pair[0], &pair[1]);
            if lower.range.end > higher.range.start {
                return Err(PatchError::OverlappingEdits {
                    first: lower.path.to_string(),
                    second: higher.path.to_string(),
                }
                .into());
            }
        }

        let mut text = document.text().to_string();
        for edit in &edits {
            debug!(
                "Replacing bytes {:?} of '{}' with {}",
                edit.range, edit.path, edit.replacement
            );
            text.replace_range(edit.range.clone(), &edit.replacement);
        }

        jsonc::parse(&text).map_err(|e| PatchError::InvalidResult {
            message: e.to_string(),
        })?;
        document.replace_text(text.clone())?;
        Ok(text)
    }

    /// Sets one field, skipping the rewrite when it already holds the value.
    ///
    /// # Errors
    ///
    /// Returns an error if the edit cannot be planned or applied.
    pub fn set(&self, document: &mut ConfigDocument, path: &FieldPath, value: Value) -> Result<PatchOutcome> {
        let edit = self.plan(document, path, value)?;
        let previous = document.text()[edit.range.clone()].to_string();

        if previous == edit.replacement {
            debug!("'{path}' already set to {previous}");
            return Ok(PatchOutcome::Unchanged);
        }

        let current = edit.replacement.clone();
        self.apply(document, vec![edit])?;
        info!("Patched '{path}': {previous} -> {current}");
        Ok(PatchOutcome::Changed { previous, current })
    }

    /// Writes the document back to the file it was loaded from.
    ///
    /// # Errors
    ///
    /// Returns an error if the document has no path or the write fails.
    pub async fn persist(&self, document: &ConfigDocument) -> Result<()> {
        let path = document
            .path()
            .ok_or_else(|| EdgeshipError::internal("Document was not loaded from a file"))?;
        write_atomic(path, document.text()).await?;
        info!("Saved {}", path.display());
        Ok(())
    }
}

/// Interprets a command-line value as a JSON scalar, falling back to a string.
#[must_use]
pub fn parse_scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null | Value::String(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn short(fingerprint: &str) -> String {
    fingerprint.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const WRANGLER: &str = r#"{
  // Worker for the sandbox bridge.
  "name": "sandbox-bridge",
  "main": "src/index.ts",
  /* Containers are reordered by the template sync,
     so never address them by index. */
  "containers": [
    {
      "class_name": "Gateway",
      "max_instances": 2, // keep small
    },
    {
      "class_name": "Sandbox",
      "image": "./Dockerfile",
      "max_instances": 10, // raised for launch
    },
  ],
}
"#;

    fn sandbox_count() -> FieldPath {
        FieldPath::parse("containers[class_name=Sandbox].max_instances").expect("valid path")
    }

    #[test]
    fn test_instance_count_override_only_touches_target() {
        let mut document = ConfigDocument::from_text(WRANGLER).expect("should parse");
        let outcome = ConfigPatcher::new()
            .set(&mut document, &sandbox_count(), json!(25))
            .expect("should patch");

        assert!(outcome.is_changed());
        let expected = WRANGLER.replace(
            "\"max_instances\": 10, // raised",
            "\"max_instances\": 25, // raised",
        );
        assert_eq!(document.text(), expected);
        assert_eq!(document.value()["containers"][1]["max_instances"], 25);
        assert_eq!(document.value()["containers"][0]["max_instances"], 2);
    }

    #[test]
    fn test_setting_same_value_is_noop() {
        let mut document = ConfigDocument::from_text(WRANGLER).expect("should parse");
        let before = document.fingerprint().to_string();
        let outcome = ConfigPatcher::new()
            .set(&mut document, &sandbox_count(), json!(10))
            .expect("should succeed");
        assert_eq!(outcome, PatchOutcome::Unchanged);
        assert_eq!(document.fingerprint(), before);
    }

    #[test]
    fn test_batch_applies_from_highest_offset() {
        let mut document = ConfigDocument::from_text(WRANGLER).expect("should parse");
        let patcher = ConfigPatcher::new();
        let name = FieldPath::parse("name").expect("valid path");
        // Plan the low-offset edit first so the batch has to be reordered.
        let edits = vec![
            patcher
                .plan(&document, &name, json!("bridge \"v2\""))
                .expect("plan name"),
            patcher
                .plan(&document, &sandbox_count(), json!(3))
                .expect("plan count"),
        ];

        let text = patcher.apply(&mut document, edits).expect("should apply");
        assert!(text.contains(r#""name": "bridge \"v2\"","#));
        assert!(text.contains("\"max_instances\": 3, // raised for launch"));
        assert!(text.contains("// keep small"));
        assert_eq!(document.value()["name"], "bridge \"v2\"");
    }

    #[test]
    fn test_stale_edit_is_rejected() {
        let mut document = ConfigDocument::from_text(WRANGLER).expect("should parse");
        let patcher = ConfigPatcher::new();
        let stale = patcher
            .plan(&document, &sandbox_count(), json!(4))
            .expect("plan");
        patcher
            .set(&mut document, &FieldPath::parse("main").expect("path"), json!("src/main.ts"))
            .expect("first edit");

        let result = patcher.apply(&mut document, vec![stale]);
        assert!(matches!(
            result,
            Err(EdgeshipError::Patch(PatchError::StaleSnapshot { .. }))
        ));
    }

    #[test]
    fn test_overlapping_edits_are_rejected() {
        let mut document = ConfigDocument::from_text(WRANGLER).expect("should parse");
        let patcher = ConfigPatcher::new();
        let edits = vec![
            patcher.plan(&document, &sandbox_count(), json!(1)).expect("plan"),
            patcher.plan(&document, &sandbox_count(), json!(2)).expect("plan"),
        ];
        assert!(matches!(
            patcher.apply(&mut document, edits),
            Err(EdgeshipError::Patch(PatchError::OverlappingEdits { .. }))
        ));
        assert_eq!(document.text(), WRANGLER);
    }

    #[test]
    fn test_no_implicit_creation() {
        let document = ConfigDocument::from_text(WRANGLER).expect("should parse");
        let path = FieldPath::parse("containers[class_name=Missing].max_instances").expect("path");
        assert!(matches!(
            ConfigPatcher::new().plan(&document, &path, json!(1)),
            Err(EdgeshipError::Patch(PatchError::PathNotFound { .. }))
        ));

        let new_field = FieldPath::parse("compatibility_date").expect("path");
        assert!(matches!(
            ConfigPatcher::new().plan(&document, &new_field, json!("2025-01-01")),
            Err(EdgeshipError::Patch(PatchError::PathNotFound { .. }))
        ));
    }

    #[test]
    fn test_non_scalar_target_and_value() {
        let document = ConfigDocument::from_text(WRANGLER).expect("should parse");
        let patcher = ConfigPatcher::new();
        let containers = FieldPath::parse("containers").expect("path");
        assert!(matches!(
            patcher.plan(&document, &containers, json!(1)),
            Err(EdgeshipError::Patch(PatchError::NotScalar { .. }))
        ));
        assert!(matches!(
            patcher.plan(&document, &sandbox_count(), json!([1])),
            Err(EdgeshipError::Patch(PatchError::NotScalar { .. }))
        ));
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("wrangler.jsonc");
        std::fs::write(&path, WRANGLER).expect("write");

        let mut document = ConfigDocument::load(&path).expect("load");
        let patcher = ConfigPatcher::new();
        patcher
            .set(&mut document, &sandbox_count(), json!(25))
            .expect("patch");
        patcher.persist(&document).await.expect("persist");

        let reloaded = ConfigDocument::load(&path).expect("reload");
        assert_eq!(reloaded.text(), document.text());
        assert_eq!(reloaded.value()["containers"][1]["max_instances"], 25);
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("25"), json!(25));
        assert_eq!(parse_scalar("true"), json!(true));
        assert_eq!(parse_scalar("\"quoted\""), json!("quoted"));
        assert_eq!(parse_scalar("plain text"), json!("plain text"));
        assert_eq!(parse_scalar("[1]"), json!("[1]"));
    }
}
