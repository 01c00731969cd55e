//! Host-facing entry point wiring the indexer from configuration.

use crate::controller::{Controller, ProgressReporter, TracingReporter};
use crate::engine::{EngineRegistry, LanguageEngine};
use crate::request::{canonical_path, RequestId, ScanRequest};
use crate::scanner::{DirScanReport, DirectoryScanner};
use crate::scheduler::{Scheduler, SchedulerOptions};
use crate::storage::IndexStore;
use crate::watcher::{spawn_invalidator, FileWatcher, WatcherOptions};
use crate::IndexerError;
use codeintel_core::{AreaResource, IndexerConfig, ResourceResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Stops watching when dropped.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The indexing engine as seen by the host application.
pub struct Indexer {
    config: IndexerConfig,
    resolver: ResourceResolver,
    store: Arc<IndexStore>,
    engines: Arc<EngineRegistry>,
    scheduler: Scheduler,
    scanner: Arc<DirectoryScanner>,
}

impl Indexer {
    /// Build an indexer, creating and checking the storage root.
    pub async fn open(config: IndexerConfig) -> Result<Self, IndexerError> {
        Self::open_with_reporter(config, Arc::new(TracingReporter)).await
    }

    pub async fn open_with_reporter(
        config: IndexerConfig,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self, IndexerError> {
        let resolver = config.resolver()?;

        let store = Arc::new(IndexStore::new(config.storage_dir.clone()));
        store.verify_root().await?;

        let engines = Arc::new(EngineRegistry::new());
        let scheduler = Scheduler::new(
            store.clone(),
            engines.clone(),
            SchedulerOptions {
                worker_count: config.worker_count,
            },
        );
        let scanner = Arc::new(DirectoryScanner::with_reporter(
            store.clone(),
            engines.clone(),
            reporter,
        ));

        info!(storage = ?config.storage_dir, workers = config.worker_count, "Indexer opened");

        Ok(Self {
            config,
            resolver,
            store,
            engines,
            scheduler,
            scanner,
        })
    }

    pub fn register_engine(&self, language: impl Into<String>, engine: Arc<dyn LanguageEngine>) {
        self.engines.register(language, engine);
    }

    /// Start the scheduler's worker pool.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Queue a scan. Request paths are canonical, so the scan lands in the
    /// same index a directory pass over the real directory uses.
    pub fn submit(&self, request: Arc<ScanRequest>) -> Result<RequestId, IndexerError> {
        self.scheduler.submit(request)
    }

    pub async fn ensure_dir_scanned(
        &self,
        directory: &Path,
        language: &str,
        controller: &dyn Controller,
    ) -> Result<DirScanReport, IndexerError> {
        let directory = canonical_path(directory.to_path_buf());
        self.scanner
            .ensure_dir_scanned(&directory, language, controller)
            .await
    }

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
        let dirs: Vec<PathBuf> = dirs
            .into_iter()
            .map(|d| canonical_path(d.as_ref().to_path_buf()))
            .collect();
        self.scanner
            .ensure_all_dirs_scanned(dirs, language, controller)
            .await
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> AreaResource {
        self.resolver.resolve(path)
    }

    /// Watch `dirs` if watching is enabled in the configuration.
    pub fn watch<I, P>(&self, dirs: I) -> Result<Option<WatchHandle>, IndexerError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        if !self.config.watch.enabled {
            return Ok(None);
        }

        let mut watcher = FileWatcher::new(WatcherOptions {
            debounce_duration: Duration::from_millis(self.config.watch.debounce_ms),
            ..Default::default()
        });
        for dir in dirs {
            watcher.watch(dir.as_ref())?;
        }

        Ok(Some(WatchHandle {
            task: spawn_invalidator(watcher, self.scanner.clone()),
        }))
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scanner(&self) -> &Arc<DirectoryScanner> {
        &self.scanner
    }
}
