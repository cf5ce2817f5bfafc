/// Collision-safe relocation of single filesystem entries.
///
/// This module moves one file or directory into a destination directory,
/// creating the directory when needed and picking a free `name_N.ext` when the
/// plain name is already taken.
use std::ffi::{OsStr, OsString};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while relocating an entry.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Failed to create a category directory.
    #[error("Failed to create directory {}: {source}", .path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// The entry disappeared before it could be moved.
    #[error("{} no longer exists", .path.display())]
    SourceMissing { path: PathBuf },

    /// The source path has no final component to keep at the destination.
    #[error("{} has no file name component", .path.display())]
    NoFileName { path: PathBuf },

    /// Failed to move an entry to its destination.
    #[error("Failed to move {} to {}: {source}", .from.display(), .to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// The watched directory is missing or unreadable.
    #[error("Invalid base path {}: {source}", .path.display())]
    InvalidBasePath { path: PathBuf, source: io::Error },
}

impl OrganizeError {
    /// True when the failure only means the entry was already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SourceMissing { .. } => true,
            Self::MoveFailed { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for file organization operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// Moves filesystem entries into destination directories without overwriting.
pub struct FileOrganizer;

impl FileOrganizer {
    /// Moves `source` into `destination_dir` and returns the path it ended up at.
    ///
    /// The destination directory is created (with parents) if it does not exist.
    /// If an entry with the same name is already there, `_1`, `_2`, ... is
    /// inserted before the extension until a free name is found. Works the same
    /// for files and directories.
    ///
    /// On failure the source is left where it was.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use downsort::file_organizer::FileOrganizer;
    /// use std::path::Path;
    ///
    /// let result = FileOrganizer::move_entry(
    ///     Path::new("/home/me/Downloads/report.pdf"),
    ///     Path::new("/home/me/Downloads/documents"),
    /// );
    ///
    /// match result {
    ///     Ok(dest) => println!("Moved to {}", dest.display()),
    ///     Err(e) => eprintln!("Move failed: {}", e),
    /// }
    /// ```
    pub fn move_entry(source: &Path, destination_dir: &Path) -> OrganizeResult<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| OrganizeError::NoFileName {
                path: source.to_path_buf(),
            })?;

        let metadata = match fs::symlink_metadata(source) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(OrganizeError::SourceMissing {
                    path: source.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(OrganizeError::MoveFailed {
                    from: source.to_path_buf(),
                    to: destination_dir.to_path_buf(),
                    source: e,
                });
            }
        };

        fs::create_dir_all(destination_dir).map_err(|e| {
            OrganizeError::DirectoryCreationFailed {
                path: destination_dir.to_path_buf(),
                source: e,
            }
        })?;

        let destination = Self::unique_destination(destination_dir, file_name);

        Self::relocate(source, &destination, metadata.is_dir()).map_err(|e| {
            OrganizeError::MoveFailed {
                from: source.to_path_buf(),
                to: destination.clone(),
                source: e,
            }
        })?;

        debug!(from = %source.display(), to = %destination.display(), "moved entry");
        Ok(destination)
    }

    /// Picks the first free name for `file_name` inside `dir`.
    ///
    /// `report.pdf` becomes `report_1.pdf`, then `report_2.pdf`; names without
    /// an extension get the suffix appended (`folder_1`).
    pub fn unique_destination(dir: &Path, file_name: &OsStr) -> PathBuf {
        let candidate = dir.join(file_name);
        if !Self::occupied(&candidate) {
            return candidate;
        }

        let as_path = Path::new(file_name);
        let stem = as_path.file_stem().unwrap_or(file_name);
        let extension = as_path.extension();

        let mut counter: u64 = 1;
        loop {
            let mut name = OsString::from(stem);
            name.push(format!("_{}", counter));
            if let Some(ext) = extension {
                name.push(".");
                name.push(ext);
            }

            let candidate = dir.join(&name);
            if !Self::occupied(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Broken symlinks still occupy a name.
    fn occupied(path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    /// Renames `source` to `destination`, copying across devices when needed.
    fn relocate(source: &Path, destination: &Path, is_dir: bool) -> io::Result<()> {
        match fs::rename(source, destination) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!(
                    from = %source.display(),
                    "rename crosses devices, falling back to copy"
                );
                Self::copy_then_remove(source, destination, is_dir)
            }
            Err(e) => Err(e),
        }
    }

    /// Copies the entry and only then removes the original, so a failed copy
    /// never costs the source.
    ///
    /// The destination name is claimed with an exclusive create first. If
    /// another writer already took it, nothing is copied or removed.
    fn copy_then_remove(source: &Path, destination: &Path, is_dir: bool) -> io::Result<()> {
        if is_dir {
            fs::create_dir(destination)?;
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(destination)?;
        }

        let copied = if is_dir {
            let mut options = fs_extra::dir::CopyOptions::new();
            options.content_only = true;
            fs_extra::dir::copy(source, destination, &options).map(|_| ())
        } else {
            // Overwrites only the empty placeholder claimed above.
            let mut options = fs_extra::file::CopyOptions::new();
            options.overwrite = true;
            fs_extra::file::copy(source, destination, &options).map(|_| ())
        };

        if let Err(e) = copied {
            let _ = if is_dir {
                fs::remove_dir_all(destination)
            } else {
                fs::remove_file(destination)
            };
            return Err(io::Error::other(e.to_string()));
        }

        if is_dir {
            fs::remove_dir_all(source)
        } else {
            fs::remove_file(source)
        }
    }
}
