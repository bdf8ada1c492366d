//! Best-effort removal of intermediate build artifacts.

use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::BuildConfig;

/// Delete the intermediate artifacts listed by
/// [`BuildConfig::intermediate_artifacts`].
///
/// Never fails: missing files and deletion errors are logged and skipped.
/// Returns the paths that were actually removed.
pub async fn cleanup(config: &BuildConfig) -> Vec<PathBuf> {
    let mut removed = Vec::new();

    for path in config.intermediate_artifacts() {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = ?path, "Removed intermediate artifact");
                removed.push(path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = ?path, "Intermediate artifact not present");
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to remove intermediate artifact");
            }
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_cleanup_removes_intermediates_only() {
        let dir = tempdir().unwrap();
        let config = BuildConfig::from_project_root(dir.path());
        std::fs::create_dir_all(&config.paths.output_dir).unwrap();
        std::fs::create_dir_all(config.paths.published_artifact.parent().unwrap()).unwrap();

        std::fs::write(&config.paths.unsigned_build, b"unsigned").unwrap();
        std::fs::write(config.aligned_build_path(), b"aligned").unwrap();
        std::fs::write(&config.paths.published_artifact, b"signed").unwrap();

        let removed = cleanup(&config).await;

        assert_eq!(removed.len(), 2);
        assert!(!config.paths.unsigned_build.exists());
        assert!(!config.aligned_build_path().exists());
        assert!(config.paths.published_artifact.exists());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempdir().unwrap();
        let config = BuildConfig::from_project_root(dir.path());

        assert!(cleanup(&config).await.is_empty());
        assert!(cleanup(&config).await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_errors() {
        let dir = tempdir().unwrap();
        let config = BuildConfig::from_project_root(dir.path());
        // A directory where a file is expected cannot be unlinked.
        std::fs::create_dir_all(&config.paths.unsigned_build).unwrap();
        let release = config.intermediate_artifacts()[1].clone();
        std::fs::write(&release, b"release").unwrap();

        let removed = cleanup(&config).await;

        assert_eq!(removed, vec![release.clone()]);
        assert!(config.paths.unsigned_build.is_dir());
        assert!(!release.exists());
    }
}
