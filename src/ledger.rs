//! Bounded record of recently organized paths.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// How many paths the ledger remembers.
pub const LEDGER_CAPACITY: usize = 10;

/// Fixed-capacity FIFO set of paths that were already organized or acknowledged.
///
/// Only dedups within the retained window: once a path is evicted it can be
/// processed again. Nothing is persisted.
#[derive(Debug, Clone)]
pub struct ProcessedLedger {
    entries: VecDeque<PathBuf>,
    capacity: usize,
}

impl ProcessedLedger {
    pub fn new() -> Self {
        Self::with_capacity(LEDGER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Was `path` recorded within the retained window?
    pub fn seen(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry == path)
    }

    /// Records `path`, evicting the oldest entry when full.
    ///
    /// Recording a path that is already present is a no-op.
    pub fn record(&mut self, path: &Path) {
        if self.seen(path) {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(path.to_path_buf());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ProcessedLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Ledger shared by the detector and the trigger endpoint.
#[derive(Debug, Clone, Default)]
pub struct SharedLedger {
    inner: Arc<Mutex<ProcessedLedger>>,
}

impl SharedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, path: &Path) -> bool {
        self.lock().seen(path)
    }

    pub fn record(&self, path: &Path) {
        self.lock().record(path);
    }

    /// Records `path` unless it is already present.
    ///
    /// Returns false when the path was already in the ledger. The check and the
    /// insert happen under one lock, so two callers cannot both claim a path.
    pub fn claim(&self, path: &Path) -> bool {
        let mut ledger = self.lock();
        if ledger.seen(path) {
            return false;
        }
        ledger.record(path);
        true
    }

    /// A poisoned lock still holds a consistent ledger: every mutation is a
    /// single push or pop.
    fn lock(&self) -> MutexGuard<'_, ProcessedLedger> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
