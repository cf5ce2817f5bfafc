//! Engine configuration.
//!
//! Settings are read from a TOML file and compiled once into an immutable
//! [`EngineConfig`] that every component receives at construction. The file is
//! optional; every section falls back to the built-in defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! fallback = "others"
//!
//! [watch]
//! directory = "/home/me/Downloads"
//! move_folders = true
//! sweep_interval_ms = 1000
//! pending_timeout_secs = 30
//! partial_suffixes = [".part", ".crdownload"]
//!
//! [[categories]]
//! name = "videos"
//! extensions = [".mkv", ".mp4"]
//!
//! [icons]
//! enabled = true
//! directory = "/home/me/.local/share/downsort/icons"
//!
//! [server]
//! port = 8000
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["desktop.ini", "Thumbs.db"]
//! patterns = ["*.tmp"]
//! extensions = ["bak"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```

use crate::file_category::{CategoryRule, CategoryTable, DEFAULT_FALLBACK, default_rules};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".downsort.toml";

/// Errors that can occur while loading or compiling configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },
    /// A category definition is malformed.
    #[error("Invalid category table: {0}")]
    InvalidCategory(String),
    /// The same extension is claimed by two categories.
    #[error("Extension '{extension}' belongs to both '{first}' and '{second}'")]
    OverlappingExtension {
        extension: String,
        first: String,
        second: String,
    },
    /// A timing value is out of range.
    #[error("Invalid watch timing: {0}")]
    InvalidTiming(String),
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Raw, deserialized settings as they appear in the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Name of the catch-all category.
    #[serde(default = "default_fallback")]
    pub fallback: String,

    #[serde(default)]
    pub watch: WatchSettings,

    /// Category rules in lookup order.
    #[serde(default = "default_rules")]
    pub categories: Vec<CategoryRule>,

    #[serde(default)]
    pub icons: IconSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub filters: FilterRules,
}

fn default_fallback() -> String {
    DEFAULT_FALLBACK.to_string()
}

/// `[watch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Directory to organize. Resolved from the platform when absent.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Move loose directories into the fallback category.
    #[serde(default = "default_true")]
    pub move_folders: bool,

    /// Period of the pending-entry sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// How long a path may stay pending before the sweep re-checks it.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,

    /// Name suffixes marking an unfinished download.
    #[serde(default = "default_partial_suffixes")]
    pub partial_suffixes: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_pending_timeout_secs() -> u64 {
    30
}

fn default_partial_suffixes() -> Vec<String> {
    [
        ".part",
        ".crdownload",
        ".download",
        ".partial",
        ".tmp",
        ".opdownload",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            directory: None,
            move_folders: true,
            sweep_interval_ms: default_sweep_interval_ms(),
            pending_timeout_secs: default_pending_timeout_secs(),
            partial_suffixes: default_partial_suffixes(),
        }
    }
}

/// `[icons]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IconSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding one `<category>.ico` per category. Defaults to an
    /// `icons` directory next to the executable, when there is one.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for IconSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

/// The `icons` directory beside `exe`, if it exists.
pub fn icons_beside(exe: &Path) -> Option<PathBuf> {
    let dir = exe.parent()?.join("icons");
    dir.is_dir().then_some(dir)
}

fn bundled_icons_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    icons_beside(&exe)
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// `[filters]` section: which entries take part in organization at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default)]
    pub enable_hidden_files: bool,

    /// Rules for excluding entries.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including entries (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: false,
            exclude: ExcludeRules {
                filenames: vec!["desktop.ini".to_string(), "Thumbs.db".to_string()],
                ..Default::default()
            },
            include: IncludeRules::default(),
        }
    }
}

/// Rules for excluding entries from organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact names to exclude (e.g., "desktop.ini", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns to exclude (e.g., "*.torrent").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions to exclude, without the dot (e.g., "bak").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns matched against the entry name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including entries, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fallback: default_fallback(),
            watch: WatchSettings::default(),
            categories: default_rules(),
            icons: IconSettings::default(),
            server: ServerSettings::default(),
            filters: FilterRules::default(),
        }
    }
}

impl Settings {
    /// Load settings from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.downsort.toml` in the current directory
    /// 3. Look for `~/.config/downsort/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read,
    /// or if any discovered file is not valid TOML.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home_config) = directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".config").join("downsort").join("config.toml"))
            && home_config.exists()
        {
            return Self::load_from_file(&home_config);
        }

        Ok(Self::default())
    }

    /// Load settings from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Validate and compile these settings for a resolved watched directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the category table, filter patterns, or timings are invalid.
    pub fn compile(self, watched_dir: PathBuf) -> Result<EngineConfig, ConfigError> {
        if self.watch.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidTiming(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }

        let categories = CategoryTable::new(self.categories, &self.fallback)?;
        let filters = CompiledFilters::new(self.filters)?;

        let partial_suffixes = self
            .watch
            .partial_suffixes
            .iter()
            .map(|suffix| suffix.trim().to_lowercase())
            .filter(|suffix| !suffix.is_empty())
            .collect();

        let icons_dir = if self.icons.enabled {
            self.icons.directory.or_else(bundled_icons_dir)
        } else {
            None
        };

        Ok(EngineConfig {
            watched_dir,
            categories,
            filters,
            partial_suffixes,
            move_folders: self.watch.move_folders,
            sweep_interval: Duration::from_millis(self.watch.sweep_interval_ms),
            pending_timeout: Duration::from_secs(self.watch.pending_timeout_secs),
            icons_dir,
            server_port: self.server.port,
        })
    }
}

/// Case-insensitive match of `file_name` against lowercase `suffixes`.
pub fn has_partial_suffix(file_name: &str, suffixes: &[String]) -> bool {
    let lower = file_name.to_lowercase();
    suffixes.iter().any(|suffix| lower.ends_with(suffix.as_str()))
}

/// Immutable configuration shared by every engine component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The directory whose immediate entries are organized.
    pub watched_dir: PathBuf,
    pub categories: CategoryTable,
    pub filters: CompiledFilters,
    /// Lowercase name suffixes marking an unfinished download.
    pub partial_suffixes: Vec<String>,
    /// Whether loose directories are moved into the fallback category.
    pub move_folders: bool,
    pub sweep_interval: Duration,
    pub pending_timeout: Duration,
    /// Icon directory, present only when icon tagging is enabled.
    pub icons_dir: Option<PathBuf>,
    pub server_port: u16,
}

impl EngineConfig {
    /// Default configuration for `watched_dir`.
    pub fn with_defaults(watched_dir: impl Into<PathBuf>) -> Self {
        match Settings::default().compile(watched_dir.into()) {
            Ok(config) => config,
            Err(e) => unreachable!("default settings are invalid: {}", e),
        }
    }

    /// Returns true if the name carries a partial-download suffix.
    pub fn is_partial(&self, file_name: &str) -> bool {
        has_partial_suffix(file_name, &self.partial_suffixes)
    }

    /// Directory for one category.
    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.watched_dir.join(category)
    }
}

/// Compiled filter structures for efficient entry matching.
///
/// Glob and regex patterns are parsed once so matching an entry only walks the
/// rule lists.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Create compiled filters from filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(rules: FilterRules) -> Result<Self, ConfigError> {
        let compile_globs = |patterns: &[String]| {
            patterns
                .iter()
                .map(|pattern| {
                    Pattern::new(pattern)
                        .map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
                })
                .collect::<Result<Vec<_>, _>>()
        };

        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Check if an entry should take part in organization.
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden entry filter - if hidden and disabled, exclude
    /// 3. Exact name match - if matched, exclude
    /// 4. Extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, path: &Path) -> bool {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self.matches_any(&self.include_patterns, path) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.matches_any(&self.exclude_patterns, path) {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }

    /// Globs are tried against the full path and against the bare name, so
    /// `*.tmp` matches an entry regardless of where the watched directory lives.
    fn matches_any(&self, patterns: &[Pattern], path: &Path) -> bool {
        let name = path.file_name().map(Path::new);
        patterns.iter().any(|pattern| {
            pattern.matches_path(path) || name.is_some_and(|n| pattern.matches_path(n))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(rules: FilterRules) -> CompiledFilters {
        CompiledFilters::new(rules).unwrap()
    }

    #[test]
    fn test_default_settings_compile() {
        let config = Settings::default().compile(PathBuf::from("/tmp/dl")).unwrap();
        assert_eq!(config.watched_dir, PathBuf::from("/tmp/dl"));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.pending_timeout, Duration::from_secs(30));
        assert!(config.move_folders);
        assert!(config.icons_dir.is_none());
        assert_eq!(config.server_port, 8000);
        assert_eq!(config.categories.fallback(), "others");
    }

    #[test]
    fn test_partial_suffix_detection() {
        let config = EngineConfig::with_defaults("/tmp/dl");
        assert!(config.is_partial("video.mkv.part"));
        assert!(config.is_partial("setup.exe.CRDOWNLOAD"));
        assert!(!config.is_partial("video.mkv"));
        assert!(!config.is_partial("partition.img"));

        let suffixes = vec![".part".to_string()];
        assert!(has_partial_suffix("Movie.MKV.PART", &suffixes));
        assert!(!has_partial_suffix("movie.mkv", &suffixes));
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let settings = Settings::from_toml(
            r#"
fallback = "misc"

[watch]
move_folders = false
pending_timeout_secs = 5

[[categories]]
name = "books"
extensions = ["epub", ".pdf"]

[server]
port = 9100
"#,
        )
        .unwrap();

        let config = settings.compile(PathBuf::from("/data")).unwrap();
        assert!(!config.move_folders);
        assert_eq!(config.pending_timeout, Duration::from_secs(5));
        assert_eq!(config.sweep_interval, Duration::from_millis(1000));
        assert_eq!(config.server_port, 9100);
        assert_eq!(config.categories.classify("x.pdf"), "books");
        assert_eq!(config.categories.classify("x.mkv"), "misc");
        assert_eq!(config.category_dir("books"), PathBuf::from("/data/books"));
    }

    #[test]
    fn test_icons_dir_only_when_enabled() {
        let settings = Settings::from_toml(
            r#"
[icons]
enabled = false
directory = "/icons"
"#,
        )
        .unwrap();
        assert!(settings.compile(PathBuf::from("/d")).unwrap().icons_dir.is_none());

        let settings = Settings::from_toml(
            r#"
[icons]
enabled = true
directory = "/icons"
"#,
        )
        .unwrap();
        assert_eq!(
            settings.compile(PathBuf::from("/d")).unwrap().icons_dir,
            Some(PathBuf::from("/icons"))
        );
    }

    #[test]
    fn test_icons_default_to_directory_beside_executable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let exe = temp_dir.path().join("downsort.exe");
        assert_eq!(icons_beside(&exe), None);

        std::fs::create_dir(temp_dir.path().join("icons")).unwrap();
        assert_eq!(icons_beside(&exe), Some(temp_dir.path().join("icons")));

        assert!(IconSettings::default().enabled);
        let settings = Settings::from_toml("[icons]\n").unwrap();
        assert!(settings.icons.enabled);
        assert_eq!(settings.icons.directory, None);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let result = Settings::from_toml("[watch\nmove_folders = true");
        assert!(matches!(result, Err(ConfigError::ConfigInvalid(_))));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut settings = Settings::default();
        settings.watch.sweep_interval_ms = 0;
        assert!(matches!(
            settings.compile(PathBuf::from("/d")),
            Err(ConfigError::InvalidTiming(_))
        ));
    }

    #[test]
    fn test_overlapping_categories_rejected_on_compile() {
        let settings = Settings::from_toml(
            r#"
[[categories]]
name = "a"
extensions = [".iso"]

[[categories]]
name = "b"
extensions = [".ISO"]
"#,
        )
        .unwrap();
        assert!(settings.compile(PathBuf::from("/d")).is_err());
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let result = Settings::load(Some(Path::new("/non/existent/downsort.toml")));
        assert!(matches!(result, Err(ConfigError::ConfigNotFound(_))));
    }

    #[test]
    fn test_default_filters_hide_hidden_and_shell_files() {
        let filters = compile(FilterRules::default());
        assert!(!filters.should_include(Path::new("/dl/.DS_Store")));
        assert!(!filters.should_include(Path::new("/dl/desktop.ini")));
        assert!(!filters.should_include(Path::new("/dl/Thumbs.db")));
        assert!(filters.should_include(Path::new("/dl/movie.mkv")));
    }

    #[test]
    fn test_hidden_file_included_when_enabled() {
        let filters = compile(FilterRules {
            enable_hidden_files: true,
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        });
        assert!(filters.should_include(Path::new(".DS_Store")));
    }

    #[test]
    fn test_exclude_extensions() {
        let filters = compile(FilterRules {
            enable_hidden_files: true,
            exclude: ExcludeRules {
                extensions: vec!["bak".to_string(), ".torrent".to_string()],
                ..Default::default()
            },
            include: IncludeRules::default(),
        });

        assert!(!filters.should_include(Path::new("file.bak")));
        assert!(!filters.should_include(Path::new("file.BAK")));
        assert!(!filters.should_include(Path::new("linux.iso.torrent")));
        assert!(filters.should_include(Path::new("file.txt")));
    }

    #[test]
    fn test_exclude_glob_matches_bare_name_under_any_directory() {
        let filters = compile(FilterRules {
            enable_hidden_files: true,
            exclude: ExcludeRules {
                patterns: vec!["keep-*".to_string()],
                ..Default::default()
            },
            include: IncludeRules::default(),
        });

        assert!(!filters.should_include(Path::new("/home/me/Downloads/keep-this.pdf")));
        assert!(filters.should_include(Path::new("/home/me/Downloads/this.pdf")));
    }

    #[test]
    fn test_include_overrides_exclude() {
        let filters = compile(FilterRules {
            enable_hidden_files: false,
            exclude: ExcludeRules::default(),
            include: IncludeRules {
                patterns: vec![".important".to_string()],
            },
        });

        assert!(filters.should_include(Path::new(".important")));
        assert!(!filters.should_include(Path::new(".other")));
    }

    #[test]
    fn test_exclude_regex() {
        let filters = compile(FilterRules {
            enable_hidden_files: true,
            exclude: ExcludeRules {
                regex: vec![r"^draft_.*\.txt$".to_string()],
                ..Default::default()
            },
            include: IncludeRules::default(),
        });

        assert!(!filters.should_include(Path::new("draft_notes.txt")));
        assert!(filters.should_include(Path::new("notes.txt")));
    }

    #[test]
    fn test_invalid_patterns_return_errors() {
        let bad_regex = CompiledFilters::new(FilterRules {
            enable_hidden_files: true,
            exclude: ExcludeRules {
                regex: vec!["[invalid(".to_string()],
                ..Default::default()
            },
            include: IncludeRules::default(),
        });
        assert!(matches!(
            bad_regex,
            Err(ConfigError::InvalidRegexPattern { .. })
        ));

        let bad_glob = CompiledFilters::new(FilterRules {
            enable_hidden_files: true,
            exclude: ExcludeRules {
                patterns: vec!["[invalid".to_string()],
                ..Default::default()
            },
            include: IncludeRules::default(),
        });
        assert!(matches!(bad_glob, Err(ConfigError::InvalidGlobPattern(_))));
    }
}
