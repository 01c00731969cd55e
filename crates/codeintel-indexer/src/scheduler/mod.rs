//! Priority scheduling of scan requests.
//!
//! Requests move `queued → running → complete` and never backward. Each
//! worker pops the most urgent batch, skips the engine when the stored
//! digest shows the file unchanged (unless forced), records the new entry,
//! and completes every request in the batch whatever the outcome.

mod queue;

use queue::{Batch, ScanQueue};

use crate::engine::EngineRegistry;
use crate::request::{Priority, RequestId, ScanRequest};
use crate::scanner::{run_file_scan, FileScanOutcome};
use crate::storage::IndexStore;
use crate::IndexerError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Scheduler options.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Number of worker tasks started by [`Scheduler::start`]
    pub worker_count: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self { worker_count: 2 }
    }
}

/// Counters since the scheduler was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    /// Submissions merged into an already queued request for the same file
    pub coalesced: u64,
    pub scanned: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    coalesced: AtomicU64,
    scanned: AtomicU64,
    unchanged: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

struct Inner {
    queue: Mutex<ScanQueue>,
    notify: Notify,
    shutdown: AtomicBool,
    next_id: AtomicU64,
    store: Arc<IndexStore>,
    engines: Arc<EngineRegistry>,
    counters: Counters,
}

/// Owns the scan queue and its worker pool.
pub struct Scheduler {
    inner: Arc<Inner>,
    options: SchedulerOptions,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<IndexStore>,
        engines: Arc<EngineRegistry>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(ScanQueue::default()),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                store,
                engines,
                counters: Counters::default(),
            }),
            options,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Queue a request and return its id.
    pub fn submit(&self, request: Arc<ScanRequest>) -> Result<RequestId, IndexerError> {
        self.inner.submit(request)
    }

    /// Spawn the worker pool on the current tokio runtime.
    ///
    /// Calling this again while workers are running has no effect.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        let count = self.options.worker_count.max(1);
        for worker in 0..count {
            let inner = self.inner.clone();
            workers.push(tokio::spawn(inner.worker_loop(worker)));
        }
        info!(workers = count, "Scan scheduler started");
    }

    /// Process queued requests on the calling task until the queue is empty.
    ///
    /// Returns the number of batches processed.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            let batch = self.inner.queue.lock().pop();
            match batch {
                Some(batch) => {
                    self.inner.process(batch).await;
                    processed += 1;
                }
                None => return processed,
            }
        }
    }

    /// Stop the workers after their current scan.
    ///
    /// Requests still queued are completed without scanning so no waiter hangs.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Scan worker ended abnormally");
            }
        }

        let abandoned = self.inner.complete_abandoned();
        info!(abandoned, "Scan scheduler stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Number of distinct files waiting to be scanned.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.inner.counters;
        SchedulerStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            scanned: c.scanned.load(Ordering::Relaxed),
            unchanged: c.unchanged.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        self.inner.complete_abandoned();
    }
}

impl Inner {
    fn submit(&self, request: Arc<ScanRequest>) -> Result<RequestId, IndexerError> {
        if self.engines.get(request.language()).is_none() {
            return Err(IndexerError::UnsupportedLanguage(
                request.language().to_string(),
            ));
        }

        // Checked under the queue lock so shutdown's final drain sees every
        // request that got past it.
        let mut queue = self.queue.lock();
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(IndexerError::ShutDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if !request.assign_id(id) {
            // Already submitted once; it is queued or done.
            return Ok(request.id().unwrap_or(id));
        }

        debug!(
            id,
            path = ?request.path(),
            language = %request.language(),
            priority = ?request.priority(),
            "Scan request queued"
        );

        let coalesced = queue.push(request);
        drop(queue);

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if coalesced {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();

        Ok(id)
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(worker, "Scan worker started");
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let batch = self.queue.lock().pop();
            match batch {
                Some(batch) => self.process(batch).await,
                None => notified.await,
            }
        }
        debug!(worker, "Scan worker stopped");
    }

    async fn process(&self, batch: Batch) {
        if let Some(primary) = batch.primary() {
            self.scan_batch(primary.clone(), &batch).await;
        }
        batch.complete_all();
    }

    async fn scan_batch(&self, primary: Arc<ScanRequest>, batch: &Batch) {
        let language = primary.language().to_string();
        let Some(engine) = self.engines.get(&language) else {
            warn!(path = ?primary.path(), language = %language, "No engine for language");
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let (Some(directory), Some(base_name)) = (
            primary.path().parent().map(|p| p.to_path_buf()),
            primary.base_name(),
        ) else {
            warn!(path = ?primary.path(), "Scan target has no parent directory");
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let stored = match self.store.load(&directory, &language).await {
            Ok(index) => index.get(&base_name).cloned(),
            Err(e) => {
                warn!(directory = ?directory, error = %e, "Cannot read index, scanning anyway");
                None
            }
        };

        match run_file_scan(engine, primary.clone(), stored, batch.force()).await {
            FileScanOutcome::Scanned {
                entry,
                dependencies,
            } => {
                self.counters.scanned.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self
                    .store
                    .update(&directory, &language, move |idx| {
                        idx.insert(entry);
                    })
                    .await
                {
                    error!(path = ?primary.path(), language = %language, error = %e, "Failed to record scan");
                }
                if batch.scan_imports() {
                    self.queue_imports(&language, dependencies);
                }
            }
            FileScanOutcome::Unchanged => {
                self.counters.unchanged.fetch_add(1, Ordering::Relaxed);
            }
            FileScanOutcome::Skipped => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            FileScanOutcome::Failed => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn queue_imports(&self, language: &str, dependencies: Vec<std::path::PathBuf>) {
        for dependency in dependencies {
            let request = Arc::new(
                ScanRequest::new(dependency, language, Priority::Imports).scan_imports(false),
            );
            if let Err(e) = self.submit(request) {
                debug!(error = %e, "Dropped import scan");
            }
        }
    }

    fn complete_abandoned(&self) -> usize {
        let batches = self.queue.lock().drain();
        let count = batches.iter().map(|b| b.requests.len()).sum();
        for batch in batches {
            batch.complete_all();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LanguageEngine, ScanSummary};
    use chrono::{DateTime, Utc};
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Records the order of scanned paths; reports `dep.py` as a dependency of `main.py`.
    #[derive(Default)]
    struct RecordingEngine {
        order: Mutex<Vec<PathBuf>>,
    }

    impl LanguageEngine for RecordingEngine {
        fn scan(
            &self,
            path: &Path,
            content: &str,
            _mtime: Option<DateTime<Utc>>,
        ) -> anyhow::Result<ScanSummary> {
            self.order.lock().push(path.to_path_buf());
            if content == "boom" {
                anyhow::bail!("engine exploded");
            }
            let mut summary = ScanSummary::new(path.display().to_string());
            if path.ends_with("main.py") {
                summary.dependencies.push(path.with_file_name("dep.py"));
            }
            Ok(summary)
        }

        fn list_importables(&self, _directory: &Path) -> std::io::Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }
    }

    fn scheduler(storage: &Path) -> (Scheduler, Arc<RecordingEngine>, Arc<IndexStore>) {
        let store = Arc::new(IndexStore::new(storage.to_path_buf()));
        let engines = Arc::new(EngineRegistry::new());
        let engine = Arc::new(RecordingEngine::default());
        engines.register("Python", engine.clone());
        let scheduler = Scheduler::new(
            store.clone(),
            engines,
            SchedulerOptions { worker_count: 1 },
        );
        (scheduler, engine, store)
    }

    fn content_request(path: &str, priority: Priority, content: &str) -> Arc<ScanRequest> {
        Arc::new(
            ScanRequest::new(path, "Python", priority)
                .with_content(content.to_string())
                .scan_imports(false),
        )
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let temp_dir = tempdir().unwrap();
        let (scheduler, _, _) = scheduler(temp_dir.path());

        let a = scheduler
            .submit(content_request("/src/a.py", Priority::Open, "a"))
            .unwrap();
        let b = scheduler
            .submit(content_request("/src/b.py", Priority::Open, "b"))
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_drain_order_by_priority() {
        let temp_dir = tempdir().unwrap();
        let (scheduler, engine, _) = scheduler(temp_dir.path());

        scheduler
            .submit(content_request("/src/a.py", Priority::Background, "a"))
            .unwrap();
        scheduler
            .submit(content_request("/src/b.py", Priority::Immediate, "b"))
            .unwrap();
        scheduler
            .submit(content_request("/src/c.py", Priority::Background, "c"))
            .unwrap();

        assert_eq!(scheduler.drain().await, 3);

        let order: Vec<_> = engine.order.lock().clone();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/src/b.py"),
                PathBuf::from("/src/a.py"),
                PathBuf::from("/src/c.py"),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_still_completes() {
        let temp_dir = tempdir().unwrap();
        let (scheduler, _, store) = scheduler(temp_dir.path());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let request = Arc::new(
            ScanRequest::new("/src/bad.py", "Python", Priority::Current)
                .with_content("boom")
                .on_complete(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        );
        scheduler.submit(request.clone()).unwrap();
        scheduler.drain().await;

        assert!(request.wait(Some(Duration::from_secs(1))).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats().failed, 1);
        assert!(store
            .load(Path::new("/src"), "Python")
            .await
            .unwrap()
            .get("bad.py")
            .is_none());
    }

    #[tokio::test]
    async fn test_unchanged_skipped_unless_forced() {
        let temp_dir = tempdir().unwrap();
        let (scheduler, engine, store) = scheduler(temp_dir.path());

        scheduler
            .submit(content_request("/src/a.py", Priority::Open, "same"))
            .unwrap();
        scheduler.drain().await;
        let first = store
            .load(Path::new("/src"), "Python")
            .await
            .unwrap()
            .get("a.py")
            .cloned()
            .unwrap();

        scheduler
            .submit(content_request("/src/a.py", Priority::Open, "same"))
            .unwrap();
        scheduler.drain().await;
        assert_eq!(engine.order.lock().len(), 1);
        assert_eq!(scheduler.stats().unchanged, 1);

        let forced = Arc::new(
            ScanRequest::new("/src/a.py", "Python", Priority::Open)
                .with_content("same")
                .force(true),
        );
        scheduler.submit(forced).unwrap();
        scheduler.drain().await;
        assert_eq!(engine.order.lock().len(), 2);

        let second = store
            .load(Path::new("/src"), "Python")
            .await
            .unwrap()
            .get("a.py")
            .cloned()
            .unwrap();
        assert_eq!(second.digest, first.digest);
        assert!(second.scanned_at >= first.scanned_at);
    }

    #[tokio::test]
    async fn test_coalesced_requests_scan_once() {
        let temp_dir = tempdir().unwrap();
        let (scheduler, engine, _) = scheduler(temp_dir.path());

        let first = content_request("/src/a.py", Priority::Background, "old");
        let second = content_request("/src/a.py", Priority::Current, "new");
        let id1 = scheduler.submit(first.clone()).unwrap();
        let id2 = scheduler.submit(second.clone()).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(scheduler.pending(), 1);

        scheduler.drain().await;
        assert_eq!(engine.order.lock().len(), 1);
        assert!(first.is_complete());
        assert!(second.is_complete());
        assert_eq!(scheduler.stats().coalesced, 1);
    }

    #[tokio::test]
    async fn test_imports_queued() {
        let temp_dir = tempdir().unwrap();
        let src = temp_dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("dep.py"), "x = 1").unwrap();
        let src = src.canonicalize().unwrap();
        let (scheduler, engine, _) = scheduler(&temp_dir.path().join("db"));

        let main = Arc::new(
            ScanRequest::new(src.join("main.py"), "Python", Priority::Current)
                .with_content("import dep"),
        );
        scheduler.submit(main).unwrap();
        assert_eq!(scheduler.drain().await, 2);

        let order = engine.order.lock().clone();
        assert_eq!(order, vec![src.join("main.py"), src.join("dep.py")]);
    }

    #[tokio::test]
    async fn test_unknown_language_rejected() {
        let temp_dir = tempdir().unwrap();
        let (scheduler, _, _) = scheduler(temp_dir.path());
        let request = Arc::new(ScanRequest::new("/src/a.rb", "Ruby", Priority::Open));
        assert!(matches!(
            scheduler.submit(request),
            Err(IndexerError::UnsupportedLanguage(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workers_process_and_shutdown() {
        let temp_dir = tempdir().unwrap();
        let (scheduler, engine, _) = scheduler(temp_dir.path());
        scheduler.start();

        let request = content_request("/src/a.py", Priority::Current, "a");
        scheduler.submit(request.clone()).unwrap();
        assert!(request.wait(Some(Duration::from_secs(5))).await);
        assert_eq!(engine.order.lock().len(), 1);

        scheduler.shutdown().await;
        assert!(scheduler.is_shut_down());
        assert!(matches!(
            scheduler.submit(content_request("/src/b.py", Priority::Open, "b")),
            Err(IndexerError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_completes_queued_requests() {
        let temp_dir = tempdir().unwrap();
        let (scheduler, engine, _) = scheduler(temp_dir.path());

        let request = content_request("/src/a.py", Priority::Open, "a");
        scheduler.submit(request.clone()).unwrap();
        scheduler.shutdown().await;

        assert!(request.is_complete());
        assert!(engine.order.lock().is_empty());
    }
}
