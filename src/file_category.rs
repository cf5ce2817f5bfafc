/// Category rule table and extension-based classification.
///
/// A [`CategoryTable`] maps lowercase file extensions (with their leading dot) to a
/// category name. Every category becomes a subdirectory of the watched directory, and
/// anything the table does not recognize lands in the fallback category.
///
/// # Examples
///
/// ```
/// use downsort::file_category::CategoryTable;
///
/// let table = CategoryTable::default();
/// assert_eq!(table.classify("movie.MKV"), "videos");
/// assert_eq!(table.classify("report.pdf"), "documents");
/// assert_eq!(table.classify("README"), "others");
/// ```
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Name of the catch-all category used by the default table.
pub const DEFAULT_FALLBACK: &str = "others";

/// One named bucket of extensions sharing a destination subdirectory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Directory name of the category (e.g. "videos").
    pub name: String,
    /// Extensions belonging to this category, e.g. `[".mkv", ".mp4"]`.
    ///
    /// The leading dot is optional in configuration files; extensions are
    /// normalized when the table is built.
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl CategoryRule {
    pub fn new(name: &str, extensions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
        }
    }
}

/// The built-in category rules, in lookup order.
pub fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new(
            "videos",
            &[
                ".avi", ".flv", ".m4v", ".mkv", ".mov", ".mp4", ".wmv", ".webm", ".3gp",
            ],
        ),
        CategoryRule::new(
            "documents",
            &[
                ".csv", ".doc", ".docx", ".odt", ".pdf", ".ppt", ".pptx", ".txt", ".xlsx",
            ],
        ),
        CategoryRule::new(
            "music",
            &[
                ".aac", ".flac", ".m4a", ".midi", ".mp3", ".ogg", ".wav", ".wma",
            ],
        ),
        CategoryRule::new(
            "programs",
            &[".app", ".bat", ".cmd", ".dll", ".exe", ".jar", ".msi", ".py"],
        ),
        CategoryRule::new(
            "compressed",
            &[".7z", ".bz2", ".gz", ".iso", ".rar", ".tar", ".xz", ".zip"],
        ),
        CategoryRule::new(
            "images",
            &[
                ".bmp", ".gif", ".ico", ".jpeg", ".jpg", ".png", ".svg", ".tiff", ".webp",
            ],
        ),
    ]
}

/// Normalizes an extension to lowercase with exactly one leading dot.
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_lowercase())
}

/// Returns the lowercase extension of `file_name` including its dot, if any.
///
/// Dotfiles such as `.bashrc` have no extension.
fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

/// Immutable, validated category table.
///
/// Extension sets are pairwise disjoint, so every extension maps to at most
/// one category and [`classify`](CategoryTable::classify) is a total function.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
    fallback: String,
    extension_map: HashMap<String, usize>,
}

impl CategoryTable {
    /// Builds a table from ordered rules plus the fallback category name.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a category name is empty, duplicated,
    /// collides with the fallback, or if one extension appears in two categories.
    pub fn new(rules: Vec<CategoryRule>, fallback: &str) -> Result<Self, ConfigError> {
        let fallback = fallback.trim().to_string();
        if fallback.is_empty() {
            return Err(ConfigError::InvalidCategory(
                "fallback category name is empty".to_string(),
            ));
        }

        let mut normalized: Vec<CategoryRule> = Vec::with_capacity(rules.len());
        let mut extension_map = HashMap::new();

        for rule in rules {
            let name = rule.name.trim().to_string();
            if name.is_empty() {
                return Err(ConfigError::InvalidCategory(
                    "category name is empty".to_string(),
                ));
            }
            if name == fallback {
                return Err(ConfigError::InvalidCategory(format!(
                    "category '{}' has the same name as the fallback",
                    name
                )));
            }
            if name.contains(['/', '\\']) {
                return Err(ConfigError::InvalidCategory(format!(
                    "category name '{}' must not contain path separators",
                    name
                )));
            }
            if normalized.iter().any(|existing| existing.name == name) {
                return Err(ConfigError::InvalidCategory(format!(
                    "category '{}' is defined twice",
                    name
                )));
            }

            let index = normalized.len();
            let mut extensions = Vec::with_capacity(rule.extensions.len());
            for raw in &rule.extensions {
                let ext = normalize_extension(raw);
                if ext == "." {
                    continue;
                }
                if let Some(&owner) = extension_map.get(&ext) {
                    if owner == index {
                        continue;
                    }
                    let owner: &CategoryRule = &normalized[owner];
                    return Err(ConfigError::OverlappingExtension {
                        extension: ext,
                        first: owner.name.clone(),
                        second: name,
                    });
                }
                extension_map.insert(ext.clone(), index);
                extensions.push(ext);
            }

            normalized.push(CategoryRule { name, extensions });
        }

        Ok(Self {
            rules: normalized,
            fallback,
            extension_map,
        })
    }

    /// Returns the category name for a file name.
    ///
    /// Only the extension is inspected, case-insensitively. Names without an
    /// extension, and dotfiles, map to the fallback category.
    pub fn classify(&self, file_name: &str) -> &str {
        extension_of(file_name)
            .and_then(|ext| self.extension_map.get(&ext))
            .map(|&index| self.rules[index].name.as_str())
            .unwrap_or(&self.fallback)
    }

    /// Classifies the final component of a path.
    pub fn classify_path(&self, path: &Path) -> &str {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        self.classify(&file_name)
    }

    /// The fallback category name.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// The configured rules, in lookup order, excluding the fallback.
    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Every category directory name, fallback last.
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .map(|rule| rule.name.as_str())
            .chain(std::iter::once(self.fallback.as_str()))
    }

    /// Returns true if `name` is the directory name of a category.
    pub fn is_category_dir(&self, name: &str) -> bool {
        self.category_names().any(|category| category == name)
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        // The built-in rules are disjoint, so this cannot fail.
        match Self::new(default_rules(), DEFAULT_FALLBACK) {
            Ok(table) => table,
            Err(e) => unreachable!("built-in category table is invalid: {}", e),
        }
    }
}
