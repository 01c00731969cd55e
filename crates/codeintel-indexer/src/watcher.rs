//! File system watcher for invalidating scanned directories.
//!
//! Uses the platform's native notification backend with debouncing. Every
//! change under a watched directory makes the [`DirectoryScanner`] forget
//! that directory was ensured, so the next `ensure_dir_scanned` re-checks
//! it against the index.

use crate::scanner::DirectoryScanner;
use crate::IndexerError;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// File change type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    /// One side of a rename; both old and new paths are reported
    Renamed,
}

/// A file system change event.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl FileChange {
    /// Directory whose index the change affects.
    pub fn directory(&self) -> Option<&Path> {
        self.path.parent()
    }
}

/// Options for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub debounce_duration: Duration,
    /// Indexes are per directory, so subdirectories are watched only on request
    pub recursive: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
            recursive: false,
        }
    }
}

/// Debounced watcher over any number of directories.
pub struct FileWatcher {
    options: WatcherOptions,
    tx: mpsc::Sender<FileChange>,
    rx: mpsc::Receiver<FileChange>,
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl FileWatcher {
    pub fn new(options: WatcherOptions) -> Self {
        let (tx, rx) = mpsc::channel(1000);
        Self {
            options,
            tx,
            rx,
            debouncer: None,
        }
    }

    /// Add a directory to the watch set.
    pub fn watch(&mut self, path: &Path) -> Result<(), IndexerError> {
        let path = path
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(path.to_path_buf()))?;

        if self.debouncer.is_none() {
            self.debouncer = Some(self.build_debouncer()?);
        }

        let mode = if self.options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        if let Some(debouncer) = self.debouncer.as_mut() {
            debouncer
                .watch(&path, mode)
                .map_err(|e: notify::Error| IndexerError::Watcher(e.to_string()))?;
        }

        info!(path = ?path, recursive = self.options.recursive, "Started watching");

        Ok(())
    }

    /// Receive the next change event.
    pub async fn next(&mut self) -> Option<FileChange> {
        self.rx.recv().await
    }

    /// Try to receive a change event without blocking.
    pub fn try_next(&mut self) -> Option<FileChange> {
        self.rx.try_recv().ok()
    }

    fn build_debouncer(&self) -> Result<Debouncer<RecommendedWatcher, RecommendedCache>, IndexerError> {
        let tx = self.tx.clone();
        new_debouncer(
            self.options.debounce_duration,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    for event in events {
                        for change in convert_event(&event.event) {
                            if let Err(e) = tx.blocking_send(change) {
                                error!(error = %e, "Failed to send change event");
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "Watcher error");
                    }
                }
            },
        )
        .map_err(|e| IndexerError::Watcher(e.to_string()))
    }
}

/// Convert a notify Event to file changes.
fn convert_event(event: &Event) -> Vec<FileChange> {
    let kind = match &event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Any | EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        // Directory creation or modification does not change any index entry
        .filter(|path| kind == ChangeKind::Deleted || !path.is_dir())
        .map(|path| {
            debug!(path = ?path, kind = ?kind, "File change detected");
            FileChange {
                path: path.clone(),
                kind: kind.clone(),
            }
        })
        .collect()
}

/// Forward watcher changes to `scanner` until the returned task is aborted.
pub fn spawn_invalidator(
    mut watcher: FileWatcher,
    scanner: Arc<DirectoryScanner>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = watcher.next().await {
            if let Some(directory) = change.directory() {
                scanner.invalidate(directory);
            }
        }
    })
}
