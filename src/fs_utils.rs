use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Create a directory and its parents if missing.
pub async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

/// Recursively list regular files under `root`.
///
/// Directories for which `skip_dir` returns true are not descended into.
/// Unreadable entries are skipped with a debug log; symlinks are not followed.
pub async fn collect_files<F>(root: &Path, skip_dir: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    // Async recursion is not allowed without boxing; use an explicit stack.
    let mut stack = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && dir != root => {
                debug!(path = %dir.display(), "Skipping unreadable directory");
                continue;
            }
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("Failed to read directory: {}", dir.display()));
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list directory: {}", dir.display()))?
        {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                if !skip_dir(&path) {
                    stack.push(path);
                }
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
