//! Per-category folder icons.
//!
//! After a pass has created its category directories, an optional
//! [`FolderTagger`] may decorate each one. Tagging is cosmetic: errors are
//! reported to the caller, which logs them and carries on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the Explorer folder customization file.
pub const DESKTOP_INI: &str = "desktop.ini";

#[derive(Debug, Error)]
pub enum TagError {
    #[error("No icon for category '{category}' at {}", .icon.display())]
    MissingIcon { category: String, icon: PathBuf },

    #[error("Failed to write {}: {source}", .path.display())]
    WriteFailed { path: PathBuf, source: io::Error },
}

/// Attaches a visual marker to a category directory.
pub trait FolderTagger: Send + Sync {
    fn tag(&self, folder: &Path, category: &str) -> Result<(), TagError>;
}

/// Writes a `desktop.ini` that points Explorer at `<icons_dir>/<category>.ico`.
///
/// The file is plain text and harmless on other platforms; only on Windows are
/// the folder and file attributes adjusted so Explorer picks it up.
#[derive(Debug, Clone)]
pub struct DesktopIniTagger {
    icons_dir: PathBuf,
}

impl DesktopIniTagger {
    pub fn new(icons_dir: impl Into<PathBuf>) -> Self {
        Self {
            icons_dir: icons_dir.into(),
        }
    }

    pub fn icon_path(&self, category: &str) -> PathBuf {
        self.icons_dir.join(format!("{}.ico", category))
    }

    fn contents(icon: &Path) -> String {
        format!(
            "[.ShellClassInfo]\nIconFile={}\nIconIndex=0\nConfirmFileOp=0\n",
            icon.display()
        )
    }

    #[cfg(windows)]
    fn set_attributes(folder: &Path, ini: &Path) {
        use std::process::Command;

        let run = |args: &[&str], target: &Path| {
            if let Err(e) = Command::new("attrib").args(args).arg(target).status() {
                tracing::debug!(path = %target.display(), error = %e, "attrib failed");
            }
        };
        run(&["+s"], folder);
        run(&["+s", "+h"], ini);
    }

    #[cfg(not(windows))]
    fn set_attributes(_folder: &Path, _ini: &Path) {}

    /// A previous `attrib +r` would make the rewrite fail.
    #[cfg(windows)]
    fn clear_readonly(ini: &Path) {
        if ini.exists() {
            let _ = std::process::Command::new("attrib").arg("-r").arg(ini).status();
        }
    }

    #[cfg(not(windows))]
    fn clear_readonly(_ini: &Path) {}
}

impl FolderTagger for DesktopIniTagger {
    fn tag(&self, folder: &Path, category: &str) -> Result<(), TagError> {
        let icon = self.icon_path(category);
        if !icon.is_file() {
            return Err(TagError::MissingIcon {
                category: category.to_string(),
                icon,
            });
        }

        let ini = folder.join(DESKTOP_INI);
        let contents = Self::contents(&icon);

        // Already pointing at the right icon.
        if fs::read_to_string(&ini).is_ok_and(|existing| existing == contents) {
            return Ok(());
        }

        Self::clear_readonly(&ini);

        fs::write(&ini, contents).map_err(|e| TagError::WriteFailed {
            path: ini.clone(),
            source: e,
        })?;

        Self::set_attributes(folder, &ini);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tag_writes_desktop_ini() {
        let temp_dir = TempDir::new().unwrap();
        let icons = temp_dir.path().join("icons");
        fs::create_dir(&icons).unwrap();
        fs::write(icons.join("videos.ico"), b"ico").unwrap();
        let folder = temp_dir.path().join("videos");
        fs::create_dir(&folder).unwrap();

        let tagger = DesktopIniTagger::new(&icons);
        tagger.tag(&folder, "videos").unwrap();

        let ini = fs::read_to_string(folder.join(DESKTOP_INI)).unwrap();
        assert!(ini.starts_with("[.ShellClassInfo]\n"));
        assert!(ini.contains(&format!("IconFile={}", icons.join("videos.ico").display())));
        assert!(ini.contains("IconIndex=0"));

        // Second run leaves the file as it is.
        tagger.tag(&folder, "videos").unwrap();
        assert_eq!(fs::read_to_string(folder.join(DESKTOP_INI)).unwrap(), ini);
    }

    #[test]
    fn test_missing_icon_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("music");
        fs::create_dir(&folder).unwrap();

        let tagger = DesktopIniTagger::new(temp_dir.path().join("icons"));
        let err = tagger.tag(&folder, "music").unwrap_err();
        assert!(matches!(err, TagError::MissingIcon { .. }));
        assert!(!folder.join(DESKTOP_INI).exists());
    }
}
