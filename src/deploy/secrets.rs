//! Generation and inspection of the secrets file.
//!
//! The file uses `NAME="value"` lines. Commented lines are inert: they mark
//! placeholders and unset names so the file doubles as a checklist.
//! Values obtained during a run are merged into an existing file in place.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::config::is_placeholder;
use crate::error::{EdgeshipError, Result};

const HEADER: &str = "# Secrets uploaded to the worker by the secret-sync step.\n\
                      # Commented entries are placeholders or unset and are not uploaded.\n";

/// Renders the secrets file for the names in `allow_list`.
#[must_use]
pub fn render_secrets(values: &BTreeMap<String, String>, allow_list: &[&str]) -> String {
    let mut output = String::from(HEADER);
    for name in allow_list {
        let line = match values.get(*name).map(|v| v.trim()) {
            Some(value) if value.is_empty() => format!("# {name}="),
            Some(value) if is_placeholder(value) => format!("# {name}=\"{}\"", escape(value)),
            Some(value) => format!("{name}=\"{}\"", escape(value)),
            None => format!("# {name}="),
        };
        output.push_str(&line);
        output.push('\n');
    }
    output
}

/// Parses the uncommented `NAME=value` entries of a secrets file.
#[must_use]
pub fn live_entries(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(name, value)| (name.trim(), unquote(value.trim())))
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Writes the secrets file unless it already exists.
///
/// Returns true if the file was created.
///
/// # Errors
///
/// Returns [`EdgeshipError::Secrets`] if the file cannot be written.
pub async fn materialize(
    path: &Path,
    values: &BTreeMap<String, String>,
    allow_list: &[&str],
) -> Result<bool> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|source| EdgeshipError::Secrets {
            path: path.to_path_buf(),
            source,
        })?;
    if exists {
        debug!("Secrets file {} already exists", path.display());
        return Ok(false);
    }

    let contents = render_secrets(values, allow_list);
    write_atomic(path, &contents)
        .await
        .map_err(|source| EdgeshipError::Secrets {
            path: path.to_path_buf(),
            source,
        })?;
    info!(
        "Generated {} with {} live entr(ies)",
        path.display(),
        live_entries(&contents).len()
    );
    Ok(true)
}

/// Writes `entries` into secrets text as live lines.
///
/// The first live or commented line for a name is replaced in place and
/// later lines for it are dropped. Names not present are appended.
#[must_use]
pub fn merge_entries(text: &str, entries: &BTreeMap<String, String>) -> String {
    let mut written: BTreeSet<&str> = BTreeSet::new();
    let mut output = String::with_capacity(text.len());

    for line in text.lines() {
        let Some((name, value)) = entry_name(line).and_then(|n| entries.get_key_value(n)) else {
            output.push_str(line);
            output.push('\n');
            continue;
        };
        if written.insert(name.as_str()) {
            output.push_str(&format!("{name}=\"{}\"\n", escape(value)));
        }
    }

    for (name, value) in entries {
        if !written.contains(name.as_str()) {
            output.push_str(&format!("{name}=\"{}\"\n", escape(value)));
        }
    }
    output
}

/// Merges `entries` into the secrets file at `path`.
///
/// Returns true if the file changed.
///
/// # Errors
///
/// Returns [`EdgeshipError::Secrets`] if the file cannot be read or written.
pub async fn merge_into_file(path: &Path, entries: &BTreeMap<String, String>) -> Result<bool> {
    let failed = |source| EdgeshipError::Secrets {
        path: path.to_path_buf(),
        source,
    };

    let text = tokio::fs::read_to_string(path).await.map_err(failed)?;
    let merged = merge_entries(&text, entries);
    if merged == text {
        debug!("Secrets file {} is up to date", path.display());
        return Ok(false);
    }

    write_atomic(path, &merged).await.map_err(failed)?;
    info!(
        "Updated {} in {}",
        entries.keys().cloned().collect::<Vec<_>>().join(", "),
        path.display()
    );
    Ok(true)
}

/// Name of a `NAME=...` or `# NAME=...` line.
fn entry_name(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let line = line.strip_prefix('#').map_or(line, str::trim_start);
    let (name, _) = line.split_once('=')?;
    let name = name.trim();
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALLOW: &[&str] = &["ANTHROPIC_API_KEY", "AI_GATEWAY_TOKEN", "GITHUB_TOKEN", "SESSION_SECRET"];

    fn values() -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("ANTHROPIC_API_KEY"), String::from("sk-\"quoted\"\\path")),
            (String::from("AI_GATEWAY_TOKEN"), String::from("your-gateway-token")),
            (String::from("SESSION_SECRET"), String::from("   ")),
        ])
    }

    #[test]
    fn test_render_marks_placeholders_and_unset() {
        let text = render_secrets(&values(), ALLOW);
        assert!(text.contains("ANTHROPIC_API_KEY=\"sk-\\\"quoted\\\"\\\\path\"\n"));
        assert!(text.contains("# AI_GATEWAY_TOKEN=\"your-gateway-token\"\n"));
        assert!(text.contains("# GITHUB_TOKEN=\n"));
        assert!(text.contains("# SESSION_SECRET=\n"));
    }

    #[test]
    fn test_live_entries_unescape() {
        let entries = live_entries(&render_secrets(&values(), ALLOW));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["ANTHROPIC_API_KEY"], "sk-\"quoted\"\\path");
        assert_eq!(live_entries("PLAIN=value\n=orphan\nnoequals\n")["PLAIN"], "value");
    }

    #[test]
    fn test_merge_replaces_commented_and_live_lines() {
        let text = "# header\n# AI_GATEWAY_TOKEN=\"your-token\"\nGITHUB_TOKEN=\"hand\"\nSESSION_SECRET=\"old\"\nSESSION_SECRET=\"dup\"\n";
        let entries = BTreeMap::from([
            (String::from("AI_GATEWAY_TOKEN"), String::from("issued-secret")),
            (String::from("SESSION_SECRET"), String::from("new")),
            (String::from("AI_GATEWAY_URL"), String::from("https://gw.example")),
        ]);

        let merged = merge_entries(text, &entries);
        assert_eq!(
            merged,
            "# header\nAI_GATEWAY_TOKEN=\"issued-secret\"\nGITHUB_TOKEN=\"hand\"\nSESSION_SECRET=\"new\"\nAI_GATEWAY_URL=\"https://gw.example\"\n"
        );
        assert_eq!(merge_entries(&merged, &entries), merged);
    }

    #[test]
    fn test_merge_ignores_prose_comments() {
        let text = "# Set the value below = required\n";
        let entries = BTreeMap::from([(String::from("GITHUB_TOKEN"), String::from("ghp"))]);
        assert_eq!(
            merge_entries(text, &entries),
            "# Set the value below = required\nGITHUB_TOKEN=\"ghp\"\n"
        );
    }

    #[tokio::test]
    async fn test_merge_into_file_writes_only_on_change() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join(".dev.vars");
        std::fs::write(&path, "# AI_GATEWAY_TOKEN=\"your-token\"\n").expect("write");
        let entries = BTreeMap::from([(String::from("AI_GATEWAY_TOKEN"), String::from("tok"))]);

        assert!(merge_into_file(&path, &entries).await.expect("merge"));
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "AI_GATEWAY_TOKEN=\"tok\"\n"
        );
        assert!(!merge_into_file(&path, &entries).await.expect("no-op"));
    }

    #[tokio::test]
    async fn test_materialize_reports_unreadable_location() {
        let temp = TempDir::new().expect("temp dir");
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "").expect("write");

        let err = materialize(&blocker.join(".dev.vars"), &values(), ALLOW)
            .await
            .expect_err("a file cannot hold the secrets file");
        assert!(matches!(err, EdgeshipError::Secrets { .. }));
    }

    #[tokio::test]
    async fn test_materialize_keeps_existing_file() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join(".dev.vars");

        assert!(materialize(&path, &values(), ALLOW).await.expect("create"));
        std::fs::write(&path, "GITHUB_TOKEN=\"hand-edited\"\n").expect("write");
        assert!(!materialize(&path, &values(), ALLOW).await.expect("keep"));
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "GITHUB_TOKEN=\"hand-edited\"\n"
        );
    }
}
