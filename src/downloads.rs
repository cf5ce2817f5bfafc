//! Locating the directory to watch.

use directories::{BaseDirs, UserDirs};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Could not determine a downloads directory; pass one explicitly")]
    NotFound,

    #[error("{} is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("Cannot access {}: {source}", .path.display())]
    Inaccessible { path: PathBuf, source: io::Error },
}

/// Picks the watched directory: an explicit argument, then the configured
/// directory, then the platform downloads folder, then `~/Downloads`.
///
/// The result is canonicalized so that notification paths compare equal.
pub fn resolve_watched_dir(
    explicit: Option<&Path>,
    configured: Option<&Path>,
) -> Result<PathBuf, ResolveError> {
    let candidate = explicit
        .or(configured)
        .map(Path::to_path_buf)
        .or_else(platform_downloads_dir)
        .ok_or(ResolveError::NotFound)?;
    canonical_dir(&candidate)
}

fn platform_downloads_dir() -> Option<PathBuf> {
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .or_else(|| BaseDirs::new().map(|dirs| dirs.home_dir().join("Downloads")))
}

fn canonical_dir(path: &Path) -> Result<PathBuf, ResolveError> {
    let canonical = fs::canonicalize(path).map_err(|source| ResolveError::Inaccessible {
        path: path.to_path_buf(),
        source,
    })?;
    if !canonical.is_dir() {
        return Err(ResolveError::NotADirectory { path: canonical });
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_directory_wins() {
        let explicit = TempDir::new().unwrap();
        let configured = TempDir::new().unwrap();

        let resolved =
            resolve_watched_dir(Some(explicit.path()), Some(configured.path())).unwrap();
        assert_eq!(resolved, fs::canonicalize(explicit.path()).unwrap());
    }

    #[test]
    fn test_configured_directory_is_used_without_argument() {
        let configured = TempDir::new().unwrap();
        let resolved = resolve_watched_dir(None, Some(configured.path())).unwrap();
        assert_eq!(resolved, fs::canonicalize(configured.path()).unwrap());
    }

    #[test]
    fn test_file_and_missing_path_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "").unwrap();

        assert!(matches!(
            resolve_watched_dir(Some(&file), None),
            Err(ResolveError::NotADirectory { .. })
        ));
        assert!(matches!(
            resolve_watched_dir(Some(&temp_dir.path().join("missing")), None),
            Err(ResolveError::Inaccessible { .. })
        ));
    }
}
