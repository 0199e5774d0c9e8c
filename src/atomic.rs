//! Atomic file replacement.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Writes `contents` to `path` without ever exposing a partial file.
///
/// The data goes to a sibling temporary file that is synced and then
/// renamed over the target.
///
/// # Errors
///
/// Returns the underlying IO error; the temporary file is removed on failure.
pub async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let temp_path = temp_path_for(path);

    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    } else {
        debug!("Wrote {} bytes to {}", contents.len(), path.display());
    }

    result
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| String::from("edgeship"), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replaces_contents_and_leaves_no_temp_file() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("wrangler.jsonc");
        std::fs::write(&path, "old").expect("write");

        write_atomic(&path, "new").await.expect("atomic write");

        assert_eq!(std::fs::read_to_string(&path).expect("read"), "new");
        let entries = std::fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_missing_directory_fails_cleanly() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("missing/wrangler.jsonc");
        assert!(write_atomic(&path, "x").await.is_err());
    }
}
