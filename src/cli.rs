//! Command-line interface for downsort.
//!
//! This module handles argument parsing and drives the engine for each
//! command: a one-shot organize (optionally a dry run), watch mode with the
//! optional trigger endpoint, the endpoint alone, and a listing of the
//! effective category table.

use crate::config::{EngineConfig, Settings};
use crate::downloads::resolve_watched_dir;
use crate::engine::Engine;
use crate::organizer::OrganizeOutcome;
use crate::output::OutputFormatter;
use crate::server;
use crate::watch::{WatchHandle, WatchLoop};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(
    name = "downsort",
    version,
    about = "Sort finished downloads into category folders"
)]
pub struct Cli {
    /// Directory to organize (defaults to your downloads folder)
    pub directory: Option<PathBuf>,

    /// Configuration file (defaults to ./.downsort.toml, then ~/.config/downsort/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show debug diagnostics
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Represents a CLI command to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Organize the directory once (the default)
    Organize {
        /// Show what would be moved without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Leave loose folders where they are
        #[arg(long)]
        no_folders: bool,
    },

    /// Organize, then keep sorting new downloads until Ctrl-C
    Watch {
        /// Also run the HTTP trigger endpoint
        #[arg(long)]
        serve: bool,

        /// Port for the trigger endpoint
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run only the HTTP trigger endpoint
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective category table
    Categories,
}

impl Default for Command {
    fn default() -> Self {
        Command::Organize {
            dry_run: false,
            no_folders: false,
        }
    }
}

/// Runs the command parsed from the command line.
pub fn run_cli(cli: Cli) -> Result<()> {
    run_cli_with_config(
        cli.command.unwrap_or_default(),
        cli.directory.as_deref(),
        cli.config.as_deref(),
    )
}

/// Runs `command` against `directory`, or the resolved downloads folder.
///
/// # Examples
///
/// ```no_run
/// use downsort::cli::{run_cli_with_config, Command};
/// use std::path::Path;
///
/// let result = run_cli_with_config(
///     Command::Organize { dry_run: true, no_folders: false },
///     Some(Path::new("/home/me/Downloads")),
///     None,
/// );
/// if let Err(e) = result {
///     eprintln!("Error: {:#}", e);
/// }
/// ```
pub fn run_cli_with_config(
    command: Command,
    directory: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<()> {
    let settings = Settings::load(config_path).context("Error loading configuration")?;
    let watched_dir = resolve_watched_dir(directory, settings.watch.directory.as_deref())?;
    let mut config = settings
        .compile(watched_dir)
        .context("Invalid configuration")?;

    match command {
        Command::Organize {
            dry_run,
            no_folders,
        } => {
            if no_folders {
                config.move_folders = false;
            }
            if dry_run {
                organize_dry_run(config)
            } else {
                organize_once(&Engine::new(config)).map(|_| ())
            }
        }
        Command::Watch { serve, port } => {
            let port = port.unwrap_or(config.server_port);
            watch(config, serve.then_some(port))
        }
        Command::Serve { port } => {
            let port = port.unwrap_or(config.server_port);
            serve_only(config, port)
        }
        Command::Categories => {
            OutputFormatter::category_listing(&config.categories);
            Ok(())
        }
    }
}

fn organize_dry_run(config: EngineConfig) -> Result<()> {
    let engine = Engine::new(config);
    let base = &engine.config().watched_dir;
    OutputFormatter::info(&format!("Analyzing {}", base.display()));

    let planned = engine.organizer().plan(&|_| false)?;
    OutputFormatter::plan_listing(&planned, base);
    OutputFormatter::plain("");
    OutputFormatter::success("Dry run complete. No files were modified.");
    Ok(())
}

/// One pass with a progress bar, per-entry lines and a summary.
fn organize_once(engine: &Engine) -> Result<OrganizeOutcome> {
    let base = engine.config().watched_dir.clone();
    OutputFormatter::info(&format!("Organizing {}", base.display()));

    let total = engine
        .organizer()
        .plan(&|path| engine.detector().is_pending(path))?
        .len();
    let pb = OutputFormatter::create_progress_bar(total as u64);

    let outcome = engine
        .organize_with(&mut |report| {
            pb.println(OutputFormatter::entry_line(&report, &base));
            pb.inc(1);
        })
        .with_context(|| format!("Error organizing {}", base.display()))?
        .unwrap_or_default();
    pb.finish_and_clear();

    OutputFormatter::pass_summary(&outcome);
    if outcome.failed > 0 {
        OutputFormatter::warning("Some entries could not be organized. See the errors above.");
    }
    Ok(outcome)
}

/// Starts the watcher, then organizes what is already there.
///
/// Anything finishing during the first pass still produces a notification.
fn start_watching(engine: &Arc<Engine>) -> Result<WatchHandle> {
    let handle = WatchLoop::start(Arc::clone(engine)).context("Could not start watch mode")?;
    organize_once(engine)?;
    Ok(handle)
}

fn watch(config: EngineConfig, serve_port: Option<u16>) -> Result<()> {
    let engine = Arc::new(Engine::new(config));
    let handle = start_watching(&engine)?;
    OutputFormatter::success(&format!(
        "Watching {} (Ctrl-C to stop)",
        engine.config().watched_dir.display()
    ));

    let result = block_until_shutdown(Arc::clone(&engine), serve_port);
    handle.stop();
    OutputFormatter::info("Stopped watching.");
    result
}

fn serve_only(config: EngineConfig, port: u16) -> Result<()> {
    let engine = Arc::new(Engine::new(config));
    OutputFormatter::success(&format!(
        "Trigger endpoint on http://127.0.0.1:{}/ (Ctrl-C to stop)",
        port
    ));
    block_until_shutdown(engine, Some(port))
}

/// Waits for Ctrl-C, serving the trigger endpoint meanwhile when a port is given.
fn block_until_shutdown(engine: Arc<Engine>, serve_port: Option<u16>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Could not start async runtime")?;

    runtime.block_on(async move {
        match serve_port {
            Some(port) => server::serve(engine, port, ctrl_c())
                .await
                .context("Trigger endpoint failed"),
            None => tokio::signal::ctrl_c()
                .await
                .context("Could not listen for Ctrl-C"),
        }
    })
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl-C, shutting down");
    }
}
