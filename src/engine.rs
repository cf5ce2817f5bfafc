//! The download organization engine.
//!
//! [`Engine`] owns the configuration, the organizer, the completion detector,
//! the processed ledger and the pass gate. The one-shot CLI, the watch loop and
//! the HTTP trigger endpoint all drive the same engine.

use crate::config::EngineConfig;
use crate::detector::{CompletionDetector, FsProbe, StabilityProbe, Transition};
use crate::file_organizer::{FileOrganizer, OrganizeError, OrganizeResult};
use crate::icons::DesktopIniTagger;
use crate::ledger::SharedLedger;
use crate::organizer::{EntryReport, OrganizeOutcome, Organizer};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a trigger request did not move anything.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("{} is not inside the watched directory", .path.display())]
    OutsideWatchedDir { path: PathBuf },

    #[error("{} is a category directory", .path.display())]
    CategoryDirectory { path: PathBuf },

    #[error("{} was already processed", .path.display())]
    AlreadyProcessed { path: PathBuf },

    #[error("{} is still downloading", .path.display())]
    StillDownloading { path: PathBuf },

    #[error(transparent)]
    Move(#[from] OrganizeError),
}

/// Serializes organization passes and coalesces triggers that arrive while one
/// is running.
#[derive(Debug, Default)]
struct PassGate {
    lock: Mutex<()>,
    rerun: AtomicBool,
}

impl PassGate {
    /// Runs `pass` unless another caller holds the gate.
    ///
    /// The holder repeats `pass` while new requests keep arriving, feeding each
    /// result to `fold`. Returns whether this caller ran at least once; a
    /// caller that finds the gate taken leaves its request for the holder.
    fn run<T, E>(
        &self,
        mut pass: impl FnMut() -> Result<T, E>,
        mut fold: impl FnMut(T),
    ) -> Result<bool, E> {
        self.rerun.store(true, Ordering::SeqCst);
        let mut ran = false;
        loop {
            let guard = match self.lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    debug!("pass already running, request coalesced");
                    return Ok(ran);
                }
            };
            while self.rerun.swap(false, Ordering::SeqCst) {
                fold(pass()?);
                ran = true;
            }
            drop(guard);

            // A request may have landed between the last check and the release.
            if !self.rerun.load(Ordering::SeqCst) {
                return Ok(ran);
            }
        }
    }

    /// Runs `section` once no pass is running, with passes held off.
    ///
    /// Also returns whether a pass was requested meanwhile; the caller owes
    /// that request a run.
    fn exclusive<R>(&self, section: impl FnOnce() -> R) -> (R, bool) {
        let guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = section();
        drop(guard);
        (result, self.rerun.load(Ordering::SeqCst))
    }
}

pub struct Engine {
    config: Arc<EngineConfig>,
    organizer: Organizer,
    detector: CompletionDetector,
    ledger: SharedLedger,
    gate: PassGate,
}

impl Engine {
    /// Builds an engine with the filesystem stability probe and, when icons are
    /// configured, the `desktop.ini` tagger.
    pub fn new(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let ledger = SharedLedger::new();

        let mut organizer = Organizer::new(Arc::clone(&config));
        if let Some(icons_dir) = &config.icons_dir {
            organizer = organizer.with_tagger(Box::new(DesktopIniTagger::new(icons_dir)));
        }

        let detector = CompletionDetector::new(
            ledger.clone(),
            Box::new(FsProbe::new(config.partial_suffixes.clone())),
            config.pending_timeout,
        );

        Self {
            config,
            organizer,
            detector,
            ledger,
            gate: PassGate::default(),
        }
    }

    /// Replaces the stability test used by the completion detector.
    pub fn with_probe(mut self, probe: Box<dyn StabilityProbe>) -> Self {
        self.detector =
            CompletionDetector::new(self.ledger.clone(), probe, self.config.pending_timeout);
        self
    }

    /// Adds a path that is never moved, in addition to the running executable.
    pub fn with_protected_path(mut self, path: &Path) -> Self {
        self.organizer = self.organizer.with_protected_path(path);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn organizer(&self) -> &Organizer {
        &self.organizer
    }

    pub fn detector(&self) -> &CompletionDetector {
        &self.detector
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Runs an organization pass, logging each entry.
    ///
    /// Returns `Ok(None)` when a pass was already running; that pass repeats
    /// once more to cover this request.
    pub fn organize(&self) -> OrganizeResult<Option<OrganizeOutcome>> {
        self.organize_with(&mut log_entry)
    }

    /// Runs an organization pass, reporting each entry to `observer`.
    ///
    /// Entries the detector still tracks as pending are left alone.
    pub fn organize_with(
        &self,
        observer: &mut dyn FnMut(EntryReport<'_>),
    ) -> OrganizeResult<Option<OrganizeOutcome>> {
        let skip = |path: &Path| self.detector.is_pending(path);
        let mut total = OrganizeOutcome::default();
        let ran = self
            .gate
            .run(|| self.organizer.run(&skip, &mut *observer), |outcome| total.merge(outcome))?;
        Ok(ran.then_some(total))
    }

    /// Is `path` an entry of the watched directory that takes part in detection?
    pub fn is_watched_entry(&self, path: &Path) -> bool {
        if path.parent() != Some(self.config.watched_dir.as_path()) {
            return false;
        }
        let Some(name) = path.file_name() else {
            return false;
        };
        !self.config.categories.is_category_dir(&name.to_string_lossy())
            && self.config.filters.should_include(path)
    }

    /// Handles a create or modify notification.
    ///
    /// When the path completes, a pass runs before this returns.
    pub fn on_change(&self, path: &Path, now: Instant) -> Transition {
        if !self.is_watched_entry(path) {
            return Transition::Ignored;
        }

        let transition = self.detector.observe(path, now);
        if transition == Transition::Complete {
            self.organize_logged("download complete");
        }
        transition
    }

    /// Handles a removal notification.
    pub fn on_remove(&self, path: &Path) -> Transition {
        self.detector.forget(path)
    }

    /// Re-checks overdue pending paths and organizes if any completed.
    pub fn sweep(&self, now: Instant) -> Option<OrganizeOutcome> {
        let completed = self.detector.sweep(now);
        if completed.is_empty() {
            return None;
        }
        debug!(count = completed.len(), "sweep completed pending paths");
        self.organize_logged("sweep")
    }

    fn organize_logged(&self, reason: &str) -> Option<OrganizeOutcome> {
        match self.organize() {
            Ok(Some(outcome)) => {
                info!(
                    reason,
                    succeeded = outcome.succeeded,
                    failed = outcome.failed,
                    "pass finished"
                );
                Some(outcome)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(reason, error = %e, "pass failed");
                None
            }
        }
    }

    /// Runs `section` with passes held off, then runs any pass that was
    /// requested in the meantime.
    fn exclusive<R>(&self, section: impl FnOnce() -> R) -> R {
        let (result, deferred) = self.gate.exclusive(section);
        if deferred {
            self.organize_logged("deferred request");
        }
        result
    }

    /// Moves one explicitly requested file into its category directory.
    ///
    /// Waits for a running pass to finish first. The path is recorded in the
    /// ledger once moved, so repeating the request is rejected.
    ///
    /// # Errors
    ///
    /// Rejects paths outside the watched directory, category directories,
    /// downloads still in progress and paths already in the ledger; mover
    /// failures are passed through.
    pub fn trigger_move(&self, path: &Path) -> Result<PathBuf, TriggerError> {
        if path.parent() != Some(self.config.watched_dir.as_path()) {
            return Err(TriggerError::OutsideWatchedDir {
                path: path.to_path_buf(),
            });
        }
        if let Some(name) = path.file_name() {
            let name = name.to_string_lossy();
            if self.config.categories.is_category_dir(&name) {
                return Err(TriggerError::CategoryDirectory {
                    path: path.to_path_buf(),
                });
            }
            if self.config.is_partial(&name) {
                return Err(TriggerError::StillDownloading {
                    path: path.to_path_buf(),
                });
            }
        }

        self.exclusive(|| self.move_requested(path))
    }

    fn move_requested(&self, path: &Path) -> Result<PathBuf, TriggerError> {
        if self.ledger.seen(path) {
            return Err(TriggerError::AlreadyProcessed {
                path: path.to_path_buf(),
            });
        }
        if self.detector.is_pending(path) {
            return Err(TriggerError::StillDownloading {
                path: path.to_path_buf(),
            });
        }

        if self.organizer.is_protected(path) {
            debug!(path = %path.display(), "trigger for own executable ignored");
            self.ledger.record(path);
            return Ok(path.to_path_buf());
        }

        let destination_dir = self.organizer.destination_for(path);
        let destination = FileOrganizer::move_entry(path, &destination_dir)?;
        self.detector.forget(path);
        self.ledger.record(path);
        info!(from = %path.display(), to = %destination.display(), "moved on request");
        Ok(destination)
    }
}

fn log_entry(report: EntryReport<'_>) {
    match report {
        EntryReport::Moved {
            source,
            destination,
            category,
        } => info!(
            from = %source.display(),
            to = %destination.display(),
            category,
            "organized"
        ),
        EntryReport::Protected { source } => {
            debug!(path = %source.display(), "own executable left in place")
        }
        EntryReport::Failed { source, error } => {
            warn!(path = %source.display(), error = %error, "could not organize")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Stability;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    fn engine(dir: &Path) -> Engine {
        Engine::new(EngineConfig::with_defaults(dir))
    }

    #[test]
    fn test_pass_with_existing_collision() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::create_dir(dir.join("documents")).unwrap();
        fs::write(dir.join("documents/report.pdf"), "old").unwrap();
        fs::write(dir.join("report.pdf"), "new").unwrap();
        fs::write(dir.join("movie.mkv"), "v").unwrap();

        let outcome = engine(dir).organize().unwrap().unwrap();

        assert_eq!((outcome.succeeded, outcome.failed), (2, 0));
        assert_eq!(
            fs::read_to_string(dir.join("documents/report_1.pdf")).unwrap(),
            "new"
        );
        assert_eq!(
            fs::read_to_string(dir.join("documents/report.pdf")).unwrap(),
            "old"
        );
        assert!(dir.join("videos/movie.mkv").is_file());
    }

    #[test]
    fn test_pass_over_category_dirs_only() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for name in ["videos", "documents", "others"] {
            fs::create_dir(dir.join(name)).unwrap();
        }

        let outcome = engine(dir).organize().unwrap().unwrap();
        assert_eq!((outcome.succeeded, outcome.failed), (0, 0));
    }

    #[test]
    fn test_partial_download_moves_after_rename() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let engine = engine(dir);
        let partial = dir.join("video.mkv.part");
        fs::write(&partial, "chunk").unwrap();

        assert_eq!(engine.on_change(&partial, Instant::now()), Transition::Pending);
        let outcome = engine.organize().unwrap().unwrap();
        assert_eq!(outcome.total(), 0);
        assert!(partial.exists());

        let finished = dir.join("video.mkv");
        fs::rename(&partial, &finished).unwrap();
        assert_eq!(engine.on_remove(&partial), Transition::Abandoned);
        assert_eq!(engine.on_change(&finished, Instant::now()), Transition::Complete);

        assert!(!finished.exists());
        assert!(dir.join("videos/video.mkv").is_file());
        assert!(engine.ledger().seen(&finished));
        assert_eq!(engine.detector().pending_count(), 0);
    }

    #[test]
    fn test_pending_entries_are_not_moved_by_a_pass() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let engine = engine(dir);
        let busy = dir.join("setup.exe.crdownload");
        fs::write(&busy, "").unwrap();
        fs::write(dir.join("notes.txt"), "").unwrap();

        engine.on_change(&busy, Instant::now());
        let outcome = engine.organize().unwrap().unwrap();

        assert_eq!(outcome.succeeded, 1);
        assert!(busy.exists());
        assert!(engine.detector().is_pending(&busy));
    }

    /// Reports every path as locked until released.
    struct Latch(Arc<AtomicBool>);

    impl StabilityProbe for Latch {
        fn check(&self, path: &Path) -> Stability {
            if !path.exists() {
                Stability::Missing
            } else if self.0.load(Ordering::SeqCst) {
                Stability::Locked
            } else {
                Stability::Stable
            }
        }
    }

    #[test]
    fn test_locked_file_is_organized_by_sweep_once_released() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let locked = Arc::new(AtomicBool::new(true));
        let engine = engine(dir).with_probe(Box::new(Latch(Arc::clone(&locked))));
        let file = dir.join("game.iso");
        fs::write(&file, "iso").unwrap();

        let start = Instant::now();
        assert_eq!(engine.on_change(&file, start), Transition::Pending);
        let timeout = engine.config().pending_timeout;
        assert!(engine.sweep(start + timeout).is_none());
        assert!(file.exists());

        locked.store(false, Ordering::SeqCst);
        let outcome = engine.sweep(start + timeout * 2).unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert!(dir.join("compressed/game.iso").is_file());
    }

    #[test]
    fn test_out_of_scope_notifications_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let engine = engine(dir);
        fs::create_dir(dir.join("music")).unwrap();

        let now = Instant::now();
        assert_eq!(engine.on_change(&dir.join("music"), now), Transition::Ignored);
        assert_eq!(
            engine.on_change(&dir.join("music/song.mp3"), now),
            Transition::Ignored
        );
        assert_eq!(engine.on_change(&dir.join(".hidden"), now), Transition::Ignored);
        assert_eq!(engine.detector().pending_count(), 0);
    }

    #[test]
    fn test_deleted_pending_path_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let engine = engine(dir);
        let partial = dir.join("album.zip.part");
        fs::write(&partial, "").unwrap();

        engine.on_change(&partial, Instant::now());
        fs::remove_file(&partial).unwrap();
        assert_eq!(engine.on_remove(&partial), Transition::Abandoned);
        assert!(engine.sweep(Instant::now() + engine.config().pending_timeout).is_none());
        assert_eq!(engine.detector().pending_count(), 0);
        assert!(!engine.ledger().seen(&partial));
    }

    #[test]
    fn test_trigger_move_and_duplicate_rejection() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let engine = engine(dir);
        let file = dir.join("invoice.pdf");
        fs::write(&file, "pdf").unwrap();

        let destination = engine.trigger_move(&file).unwrap();
        assert_eq!(destination, dir.join("documents/invoice.pdf"));

        fs::write(&file, "again").unwrap();
        assert!(matches!(
            engine.trigger_move(&file),
            Err(TriggerError::AlreadyProcessed { .. })
        ));
        assert!(file.exists());
    }

    #[test]
    fn test_trigger_move_rejections() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let engine = engine(dir);
        fs::create_dir(dir.join("images")).unwrap();

        let elsewhere = TempDir::new().unwrap();
        let outside = elsewhere.path().join("a.png");
        fs::write(&outside, "").unwrap();

        assert!(matches!(
            engine.trigger_move(&outside),
            Err(TriggerError::OutsideWatchedDir { .. })
        ));
        assert!(matches!(
            engine.trigger_move(&dir.join("images")),
            Err(TriggerError::CategoryDirectory { .. })
        ));
        assert!(matches!(
            engine.trigger_move(&dir.join("missing.png")),
            Err(TriggerError::Move(OrganizeError::SourceMissing { .. }))
        ));
        assert!(!engine.ledger().seen(&dir.join("missing.png")));
    }

    #[test]
    fn test_trigger_on_own_executable_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let tool = dir.join("downsort.exe");
        fs::write(&tool, "binary").unwrap();
        let engine = engine(dir).with_protected_path(&tool);

        assert_eq!(engine.trigger_move(&tool).unwrap(), tool);
        assert!(tool.exists());
        assert!(!dir.join("programs/downsort.exe").exists());
    }

    #[test]
    fn test_completion_during_trigger_is_organized_afterwards() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let engine = engine(dir);
        let movie = dir.join("movie.mkv");
        fs::write(&movie, "v").unwrap();

        let transition = engine.exclusive(|| engine.on_change(&movie, Instant::now()));

        assert_eq!(transition, Transition::Complete);
        assert!(!movie.exists());
        assert!(dir.join("videos/movie.mkv").is_file());
    }

    #[test]
    fn test_trigger_refuses_downloads_in_progress() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let plain = engine(dir);

        let partial = dir.join("video.mkv.part");
        fs::write(&partial, "chunk").unwrap();
        assert_eq!(plain.on_change(&partial, Instant::now()), Transition::Pending);
        assert!(matches!(
            plain.trigger_move(&partial),
            Err(TriggerError::StillDownloading { .. })
        ));
        assert!(partial.exists());
        assert!(plain.detector().is_pending(&partial));

        let locked = Arc::new(AtomicBool::new(true));
        let latched = engine(dir).with_probe(Box::new(Latch(locked)));
        let iso = dir.join("game.iso");
        fs::write(&iso, "iso").unwrap();
        assert_eq!(latched.on_change(&iso, Instant::now()), Transition::Pending);
        assert!(matches!(
            latched.trigger_move(&iso),
            Err(TriggerError::StillDownloading { .. })
        ));
        assert!(iso.exists());
        assert!(latched.detector().is_pending(&iso));
    }

    #[test]
    fn test_gate_coalesces_requests_during_a_pass() {
        let gate = Arc::new(PassGate::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = {
            let gate = Arc::clone(&gate);
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                gate.run(
                    || {
                        if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                            started_tx.send(()).unwrap();
                            release_rx.recv().unwrap();
                        }
                        Ok::<_, ()>(())
                    },
                    |()| {},
                )
            })
        };

        started_rx.recv().unwrap();
        assert_eq!(gate.run(|| Ok::<_, ()>(()), |()| {}), Ok(false));
        assert_eq!(gate.run(|| Ok::<_, ()>(()), |()| {}), Ok(false));
        release_tx.send(()).unwrap();

        assert_eq!(worker.join().unwrap(), Ok(true));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_gate_error_is_returned() {
        let gate = PassGate::default();
        assert_eq!(gate.run(|| Err::<(), _>("unreadable"), |()| {}), Err("unreadable"));
        assert_eq!(gate.run(|| Ok::<_, &str>(()), |()| {}), Ok(true));
    }
}
