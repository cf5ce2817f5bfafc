//! Watch mode: filesystem notifications plus a periodic timeout sweep.

use crate::engine::Engine;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Failures that stop watch mode from starting.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[source] notify::Error),

    #[error("Failed to watch {}: {source}", .path.display())]
    WatchPath {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("Failed to start {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        source: io::Error,
    },
}

/// Starts the notification subscription and the sweep thread for an engine.
pub struct WatchLoop;

impl WatchLoop {
    /// Subscribes to the watched directory (non-recursive) and starts two
    /// threads: one draining notifications into the engine, one sweeping
    /// overdue pending paths at the configured interval.
    pub fn start(engine: Arc<Engine>) -> Result<WatchHandle, WatchError> {
        let dir = engine.config().watched_dir.clone();
        let interval = engine.config().sweep_interval;

        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(event_tx).map_err(WatchError::WatcherCreation)?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::WatchPath {
                path: dir.clone(),
                source,
            })?;

        let events = {
            let engine = Arc::clone(&engine);
            thread::Builder::new()
                .name("downsort-events".to_string())
                .spawn(move || {
                    for res in event_rx {
                        match res {
                            Ok(event) => dispatch(&engine, &event, Instant::now()),
                            Err(e) => warn!(error = %e, "watch error"),
                        }
                    }
                    debug!("event thread finished");
                })
                .map_err(|source| WatchError::ThreadSpawn {
                    name: "event",
                    source,
                })?
        };

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sweeper = thread::Builder::new()
            .name("downsort-sweep".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            engine.sweep(Instant::now());
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("sweep thread finished");
            });

        let sweeper = match sweeper {
            Ok(handle) => handle,
            Err(source) => {
                drop(watcher);
                let _ = events.join();
                return Err(WatchError::ThreadSpawn {
                    name: "sweep",
                    source,
                });
            }
        };

        info!(path = %dir.display(), "watching for new downloads");
        Ok(WatchHandle {
            watcher: Some(watcher),
            stop: Some(stop_tx),
            events: Some(events),
            sweeper: Some(sweeper),
        })
    }
}

/// Running watch mode. Stopping (or dropping) it ends the subscription and
/// joins both threads, so a move in progress finishes first.
pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    stop: Option<Sender<()>>,
    events: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the watcher closes the event channel.
        self.watcher.take();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        for handle in [self.events.take(), self.sweeper.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("watch thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Routes one notification to the engine.
///
/// Renames count as a removal of the old name and a change of the new one.
/// A rename whose direction is unknown is judged by whether the path exists.
pub fn dispatch(engine: &Engine, event: &Event, now: Instant) {
    trace!(kind = ?event.kind, paths = ?event.paths, "notification");
    match event.kind {
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
            (RenameMode::Both, [from, to, ..]) => {
                engine.on_remove(from);
                engine.on_change(to, now);
            }
            (RenameMode::From, paths) => {
                for path in paths {
                    engine.on_remove(path);
                }
            }
            (RenameMode::To, paths) => {
                for path in paths {
                    engine.on_change(path, now);
                }
            }
            (_, paths) => {
                for path in paths {
                    if path.exists() {
                        engine.on_change(path, now);
                    } else {
                        engine.on_remove(path);
                    }
                }
            }
        },
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in &event.paths {
                engine.on_change(path, now);
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                engine.on_remove(path);
            }
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }
}
