//! downsort - keep a downloads folder sorted
//!
//! This library classifies the entries of a watched directory by file
//! extension and moves them into one subdirectory per category, resolving name
//! collisions. In watch mode a completion detector holds back files that are
//! still being written until they are stable, and an HTTP endpoint lets a
//! browser extension request a move as soon as a download finishes.

pub mod cli;
pub mod config;
pub mod detector;
pub mod downloads;
pub mod engine;
pub mod file_category;
pub mod file_organizer;
pub mod icons;
pub mod ledger;
pub mod logging;
pub mod organizer;
pub mod output;
pub mod server;
pub mod watch;

pub use config::{CompiledFilters, ConfigError, EngineConfig, Settings};
pub use detector::{CompletionDetector, FsProbe, Stability, StabilityProbe, Transition};
pub use engine::{Engine, TriggerError};
pub use file_category::{CategoryRule, CategoryTable};
pub use file_organizer::{FileOrganizer, OrganizeError};
pub use icons::{DesktopIniTagger, FolderTagger};
pub use ledger::{ProcessedLedger, SharedLedger};
pub use organizer::{EntryReport, OrganizeOutcome, Organizer, PlannedMove};
pub use watch::{WatchHandle, WatchLoop};

pub use cli::{Cli, Command, run_cli, run_cli_with_config};
