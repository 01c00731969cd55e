//! Directory-wide incremental scanning.
//!
//! [`DirectoryScanner::ensure_dir_scanned`] brings one directory's index up
//! to date: files the engine considers importable are scanned when missing
//! or stale, entries for files that disappeared are dropped, and the index
//! is written once at the end of the pass. Directories that completed a pass
//! are remembered so repeated calls are cheap.

mod file;

pub(crate) use file::{run_file_scan, FileScanOutcome};

use crate::controller::{Controller, ProgressReporter, TracingReporter};
use crate::engine::EngineRegistry;
use crate::request::{Priority, ScanRequest};
use crate::storage::{IndexEntry, IndexKey, IndexStore};
use crate::IndexerError;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of one `ensure_dir_scanned` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirScanReport {
    /// Files handed to the language engine successfully
    pub scanned: usize,
    /// Files whose digest matched the index
    pub unchanged: usize,
    /// Index entries dropped because the file is gone
    pub removed: usize,
    /// Files whose content could not be read
    pub skipped: usize,
    /// Files the engine failed on
    pub failed: usize,
    /// The controller stopped the pass early
    pub aborted: bool,
    /// The directory was already ensured; nothing was checked
    pub cached: bool,
}

/// Keeps directory indexes in sync with the files on disk.
pub struct DirectoryScanner {
    store: Arc<IndexStore>,
    engines: Arc<EngineRegistry>,
    reporter: Arc<dyn ProgressReporter>,
    /// Directories fully scanned during this scanner's lifetime
    ensured: Mutex<HashSet<IndexKey>>,
}

impl DirectoryScanner {
    pub fn new(store: Arc<IndexStore>, engines: Arc<EngineRegistry>) -> Self {
        Self::with_reporter(store, engines, Arc::new(TracingReporter))
    }

    pub fn with_reporter(
        store: Arc<IndexStore>,
        engines: Arc<EngineRegistry>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            store,
            engines,
            reporter,
            ensured: Mutex::new(HashSet::new()),
        }
    }

    /// Bring `directory`'s index up to date unless that already happened.
    pub async fn ensure_dir_scanned(
        &self,
        directory: &Path,
        language: &str,
        controller: &dyn Controller,
    ) -> Result<DirScanReport, IndexerError> {
        if self.is_ensured(directory, language) {
            return Ok(DirScanReport {
                cached: true,
                ..Default::default()
            });
        }
        self.scan_dir(directory, language, controller).await
    }

    /// Re-check `directory` even if it was already ensured.
    pub async fn rescan_dir(
        &self,
        directory: &Path,
        language: &str,
        controller: &dyn Controller,
    ) -> Result<DirScanReport, IndexerError> {
        self.ensured
            .lock()
            .remove(&IndexKey::new(directory, language));
        self.scan_dir(directory, language, controller).await
    }

    /// Ensure each directory in turn, stopping when the controller aborts.
    pub async fn ensure_all_dirs_scanned<I, P>(
        &self,
        dirs: I,
        language: &str,
        controller: &dyn Controller,
    ) -> Result<Vec<DirScanReport>, IndexerError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut reports = Vec::new();
        for dir in dirs {
            if controller.is_aborted() {
                debug!("Directory pass aborted");
                break;
            }
            let report = self
                .ensure_dir_scanned(dir.as_ref(), language, controller)
                .await?;
            let aborted = report.aborted;
            reports.push(report);
            if aborted {
                break;
            }
        }
        Ok(reports)
    }

    pub fn is_ensured(&self, directory: &Path, language: &str) -> bool {
        self.ensured
            .lock()
            .contains(&IndexKey::new(directory, language))
    }

    /// Forget that `directory` was ensured, for every language.
    pub fn invalidate(&self, directory: &Path) {
        let mut ensured = self.ensured.lock();
        let before = ensured.len();
        ensured.retain(|key| key.directory != directory);
        if ensured.len() != before {
            debug!(directory = ?directory, "Directory invalidated");
        }
    }

    /// Forget every ensured directory, forcing the next pass to re-check all.
    pub fn clear_ensured(&self) {
        self.ensured.lock().clear();
    }

    async fn scan_dir(
        &self,
        directory: &Path,
        language: &str,
        controller: &dyn Controller,
    ) -> Result<DirScanReport, IndexerError> {
        let start = Instant::now();
        let engine = self
            .engines
            .get(language)
            .ok_or_else(|| IndexerError::UnsupportedLanguage(language.to_string()))?;

        let index = self.store.load(directory, language).await?;
        let mut report = DirScanReport::default();

        let importables = {
            let engine = engine.clone();
            let dir = directory.to_path_buf();
            match tokio::task::spawn_blocking(move || engine.list_importables(&dir)).await {
                Ok(Ok(names)) => names,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(directory = ?directory, "Directory is gone");
                    BTreeSet::new()
                }
                Ok(Err(e)) => {
                    warn!(directory = ?directory, language = %language, error = %e, "Cannot list directory");
                    return Ok(report);
                }
                Err(e) => {
                    warn!(directory = ?directory, language = %language, error = %e, "Listing task aborted");
                    return Ok(report);
                }
            }
        };

        if index.is_empty() && !importables.is_empty() {
            self.reporter.report_event(&format!(
                "scanning {} files in {}",
                language,
                directory.display()
            ));
        }

        let mut updates: Vec<IndexEntry> = Vec::new();
        for base_name in &importables {
            if controller.is_aborted() {
                report.aborted = true;
                break;
            }

            let path = directory.join(base_name);
            controller.info(&format!("scanning {}", path.display()));

            let request = Arc::new(
                ScanRequest::new(path, language, Priority::Background).scan_imports(false),
            );
            let stored = index.get(base_name).cloned();

            match run_file_scan(engine.clone(), request, stored, false).await {
                FileScanOutcome::Scanned { entry, .. } => {
                    updates.push(entry);
                    report.scanned += 1;
                }
                FileScanOutcome::Unchanged => report.unchanged += 1,
                FileScanOutcome::Skipped => report.skipped += 1,
                FileScanOutcome::Failed => report.failed += 1,
            }
        }

        let vanished: Vec<String> = index
            .base_names()
            .filter(|name| !importables.contains(*name))
            .map(str::to_string)
            .collect();
        report.removed = vanished.len();

        if !updates.is_empty() || !vanished.is_empty() {
            self.store
                .update(directory, language, move |idx| {
                    for entry in updates {
                        idx.insert(entry);
                    }
                    for name in &vanished {
                        idx.remove(name);
                    }
                })
                .await?;
        }

        if !report.aborted {
            self.ensured
                .lock()
                .insert(IndexKey::new(directory, language));
        }

        info!(
            directory = ?directory,
            language = %language,
            scanned = report.scanned,
            unchanged = report.unchanged,
            removed = report.removed,
            failed = report.failed,
            aborted = report.aborted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Directory pass complete"
        );

        Ok(report)
    }
}
