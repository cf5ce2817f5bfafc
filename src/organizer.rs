//! The organization pass: one scan-and-relocate run over the watched directory.

use crate::config::EngineConfig;
use crate::file_organizer::{FileOrganizer, OrganizeError, OrganizeResult};
use crate::icons::FolderTagger;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Totals for one organization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizeOutcome {
    pub succeeded: usize,
    pub failed: usize,
    /// Successful moves per category name.
    pub by_category: BTreeMap<String, usize>,
}

impl OrganizeOutcome {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Share of handled entries that succeeded, in percent.
    pub fn effectiveness(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| self.succeeded as f64 * 100.0 / total as f64)
    }

    /// Folds the totals of another pass into this one.
    pub fn merge(&mut self, other: OrganizeOutcome) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        for (category, count) in other.by_category {
            *self.by_category.entry(category).or_insert(0) += count;
        }
    }
}

/// One entry the pass intends to relocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub category: String,
    pub is_dir: bool,
}

/// Per-entry result reported to the pass observer.
#[derive(Debug)]
pub enum EntryReport<'a> {
    Moved {
        source: &'a Path,
        destination: &'a Path,
        category: &'a str,
    },
    /// The entry is this program's own executable; left in place.
    Protected { source: &'a Path },
    Failed {
        source: &'a Path,
        error: &'a OrganizeError,
    },
}

/// Classifies and relocates the immediate entries of the watched directory.
pub struct Organizer {
    config: Arc<EngineConfig>,
    tagger: Option<Box<dyn FolderTagger>>,
    protected: Vec<PathBuf>,
}

impl Organizer {
    /// Creates an organizer that never moves the running executable.
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let protected = std::env::current_exe()
            .ok()
            .and_then(|exe| fs::canonicalize(exe).ok())
            .into_iter()
            .collect();
        Self {
            config,
            tagger: None,
            protected,
        }
    }

    pub fn with_tagger(mut self, tagger: Box<dyn FolderTagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    /// Adds a path the pass must never move.
    pub fn with_protected_path(mut self, path: &Path) -> Self {
        self.protected
            .push(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True when `path` is the running program (or another protected path).
    pub fn is_protected(&self, path: &Path) -> bool {
        if self.protected.is_empty() {
            return false;
        }
        let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.protected.iter().any(|p| *p == resolved)
    }

    /// Category directory a single entry belongs in.
    ///
    /// Directories always go to the fallback category.
    pub fn destination_for(&self, path: &Path) -> PathBuf {
        let categories = &self.config.categories;
        let category = if path.is_dir() {
            categories.fallback()
        } else {
            categories.classify_path(path)
        };
        self.config.category_dir(category)
    }

    /// Creates every category directory and hands each to the tagger.
    ///
    /// Neither a directory that cannot be created nor a tagging failure stops
    /// the pass; moves into that category will report their own errors.
    pub fn ensure_category_dirs(&self) {
        for category in self.config.categories.category_names() {
            let dir = self.config.category_dir(category);
            if let Err(e) = fs::create_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "could not create category directory");
                continue;
            }
            if let Some(tagger) = &self.tagger
                && let Err(e) = tagger.tag(&dir, category)
            {
                warn!(category, error = %e, "could not tag category directory");
            }
        }
    }

    /// Lists the moves a pass would make, without touching anything.
    ///
    /// `skip` lets the caller hold back entries it knows are still in flight.
    pub fn plan(&self, skip: &dyn Fn(&Path) -> bool) -> OrganizeResult<Vec<PlannedMove>> {
        let watched = &self.config.watched_dir;
        let entries = fs::read_dir(watched).map_err(|e| OrganizeError::InvalidBasePath {
            path: watched.clone(),
            source: e,
        })?;

        let mut planned = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();

            if self.config.categories.is_category_dir(&name) {
                continue;
            }
            if !self.config.filters.should_include(&path) {
                debug!(path = %path.display(), "excluded by filters");
                continue;
            }
            if self.config.is_partial(&name) {
                debug!(path = %path.display(), "skipping unfinished download");
                continue;
            }
            if skip(&path) {
                debug!(path = %path.display(), "skipping entry still in flight");
                continue;
            }

            let (category, is_dir) = if path.is_file() {
                (self.config.categories.classify(&name).to_string(), false)
            } else if path.is_dir() && self.config.move_folders {
                (self.config.categories.fallback().to_string(), true)
            } else {
                continue;
            };

            planned.push(PlannedMove {
                source: path,
                category,
                is_dir,
            });
        }

        planned.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(planned)
    }

    /// Runs one pass and reports each entry to `observer`.
    ///
    /// A failing entry is counted and the pass moves on to the next one.
    ///
    /// # Errors
    ///
    /// Only fails as a whole when the watched directory cannot be read.
    pub fn run(
        &self,
        skip: &dyn Fn(&Path) -> bool,
        observer: &mut dyn FnMut(EntryReport<'_>),
    ) -> OrganizeResult<OrganizeOutcome> {
        self.ensure_category_dirs();
        let planned = self.plan(skip)?;

        let mut outcome = OrganizeOutcome::default();
        for entry in &planned {
            if self.is_protected(&entry.source) {
                outcome.succeeded += 1;
                observer(EntryReport::Protected {
                    source: &entry.source,
                });
                continue;
            }

            let destination_dir = self.config.category_dir(&entry.category);
            match FileOrganizer::move_entry(&entry.source, &destination_dir) {
                Ok(destination) => {
                    outcome.succeeded += 1;
                    *outcome
                        .by_category
                        .entry(entry.category.clone())
                        .or_insert(0) += 1;
                    observer(EntryReport::Moved {
                        source: &entry.source,
                        destination: &destination,
                        category: &entry.category,
                    });
                }
                Err(error) => {
                    outcome.failed += 1;
                    observer(EntryReport::Failed {
                        source: &entry.source,
                        error: &error,
                    });
                }
            }
        }

        Ok(outcome)
    }
}
