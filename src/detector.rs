//! Completion detection for files that are still being written.
//!
//! Every path the watcher reports moves through a small state machine:
//!
//! ```text
//! Unseen --change--> Pending --stable--> Complete
//!                       |
//!                       +--removed / vanished--> Abandoned
//! ```
//!
//! Filesystem notifications can repeat, coalesce or go missing entirely, so the
//! detector is idempotent per path and a periodic [`sweep`](CompletionDetector::sweep)
//! re-checks anything that has been pending for longer than the timeout.

use crate::config::has_partial_suffix;
use crate::ledger::SharedLedger;
use std::collections::HashMap;
use std::fs::{self, File, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Result of the stability test for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Nothing is writing to the path any more.
    Stable,
    /// The name carries an in-progress download suffix.
    Partial,
    /// Another process holds the file open or locked.
    Locked,
    /// The path does not exist.
    Missing,
}

/// Decides whether a path is finished being written.
pub trait StabilityProbe: Send + Sync {
    fn check(&self, path: &Path) -> Stability;
}

/// Stability test against the real filesystem.
///
/// A file is busy while its name ends in one of the partial suffixes or while
/// an exclusive lock on it cannot be taken without blocking.
#[derive(Debug, Clone)]
pub struct FsProbe {
    partial_suffixes: Vec<String>,
}

impl FsProbe {
    /// `partial_suffixes` must already be lowercase.
    pub fn new(partial_suffixes: Vec<String>) -> Self {
        Self { partial_suffixes }
    }

    fn is_partial(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|name| {
            has_partial_suffix(&name.to_string_lossy(), &self.partial_suffixes)
        })
    }

    fn lock_state(path: &Path) -> Stability {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Stability::Missing,
            // Windows refuses to open a file another process writes with a
            // sharing violation, which surfaces here.
            Err(_) => return Stability::Locked,
        };

        match file.try_lock() {
            Ok(()) => {
                let _ = file.unlock();
                Stability::Stable
            }
            Err(TryLockError::WouldBlock) => Stability::Locked,
            Err(TryLockError::Error(e)) if e.kind() == io::ErrorKind::NotFound => {
                Stability::Missing
            }
            Err(TryLockError::Error(_)) => Stability::Locked,
        }
    }
}

impl StabilityProbe for FsProbe {
    fn check(&self, path: &Path) -> Stability {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Stability::Missing,
            Err(_) => return Stability::Locked,
        };

        if self.is_partial(path) {
            return Stability::Partial;
        }

        if metadata.is_dir() {
            return Stability::Stable;
        }

        Self::lock_state(path)
    }
}

/// A path observed changing but not yet judged complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub path: PathBuf,
    /// When the path first entered the pending state.
    pub pending_since: Instant,
    /// When the stability test last ran for this path.
    pub last_check: Instant,
}

/// What a notification or sweep did to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The path is out of scope or was organized recently; nothing tracked.
    Ignored,
    /// The path entered the pending state and is not stable yet.
    Pending,
    /// The path was already pending and is still not stable.
    StillPending,
    /// The path is stable; it was recorded in the ledger and should be organized.
    Complete,
    /// The path vanished before completing; its record was dropped.
    Abandoned,
    /// A removal arrived for a path that was never tracked.
    Untracked,
}

/// Tracks in-flight writes per path.
pub struct CompletionDetector {
    pending: Mutex<HashMap<PathBuf, PendingEntry>>,
    ledger: SharedLedger,
    probe: Box<dyn StabilityProbe>,
    timeout: Duration,
}

impl CompletionDetector {
    pub fn new(ledger: SharedLedger, probe: Box<dyn StabilityProbe>, timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ledger,
            probe,
            timeout,
        }
    }

    /// Handles a create or modify notification for `path`.
    ///
    /// Untracked paths that are not in the ledger become pending; every tracked
    /// path is then run through the stability test.
    pub fn observe(&self, path: &Path, now: Instant) -> Transition {
        let mut pending = self.lock();

        let is_new = !pending.contains_key(path);
        if is_new {
            if self.ledger.seen(path) {
                trace!(path = %path.display(), "already organized, ignoring change");
                return Transition::Ignored;
            }
            pending.insert(
                path.to_path_buf(),
                PendingEntry {
                    path: path.to_path_buf(),
                    pending_since: now,
                    last_check: now,
                },
            );
            debug!(path = %path.display(), "tracking pending path");
        }

        match self.evaluate(&mut pending, path, now) {
            Transition::Pending if !is_new => Transition::StillPending,
            transition => transition,
        }
    }

    /// Handles a removal notification. A pending record is discarded silently.
    pub fn forget(&self, path: &Path) -> Transition {
        if self.lock().remove(path).is_some() {
            debug!(path = %path.display(), "pending path removed before completing");
            Transition::Abandoned
        } else {
            Transition::Untracked
        }
    }

    /// Re-checks every entry that has been pending for at least the timeout.
    ///
    /// Returns the paths that completed during this sweep.
    pub fn sweep(&self, now: Instant) -> Vec<PathBuf> {
        let mut pending = self.lock();

        let overdue: Vec<PathBuf> = pending
            .values()
            .filter(|entry| now.saturating_duration_since(entry.pending_since) >= self.timeout)
            .map(|entry| entry.path.clone())
            .collect();

        let mut completed = Vec::new();
        for path in overdue {
            if self.evaluate(&mut pending, &path, now) == Transition::Complete {
                completed.push(path);
            }
        }
        completed
    }

    /// Runs the stability test for a tracked path and applies the result.
    fn evaluate(
        &self,
        pending: &mut HashMap<PathBuf, PendingEntry>,
        path: &Path,
        now: Instant,
    ) -> Transition {
        match self.probe.check(path) {
            Stability::Stable => {
                pending.remove(path);
                self.ledger.record(path);
                debug!(path = %path.display(), "path complete");
                Transition::Complete
            }
            Stability::Missing => {
                pending.remove(path);
                debug!(path = %path.display(), "pending path vanished");
                Transition::Abandoned
            }
            state @ (Stability::Partial | Stability::Locked) => {
                if let Some(entry) = pending.get_mut(path) {
                    entry.last_check = now;
                }
                trace!(path = %path.display(), ?state, "path still busy");
                Transition::Pending
            }
        }
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    pub fn pending_entry(&self, path: &Path) -> Option<PendingEntry> {
        self.lock().get(path).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// The stability test this detector uses.
    pub fn probe(&self) -> &dyn StabilityProbe {
        self.probe.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, PendingEntry>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
