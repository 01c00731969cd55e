//! Scan requests.
//!
//! A [`ScanRequest`] describes one file to (re)index. It is shared between
//! the caller, who may block on [`ScanRequest::wait`], and the scheduler
//! worker that eventually consumes it and calls [`ScanRequest::complete`].

use crate::IndexerError;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::error;

/// Identifier assigned to a request when it is submitted.
pub type RequestId = u64;

/// Callback fired once when a request completes.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Scan urgency. Lower values drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// The user is waiting on this result right now
    Immediate = 0,
    /// The buffer currently being edited
    Current = 1,
    /// Other open buffers
    Open = 2,
    /// Background indexing
    Background = 3,
    /// Dependencies discovered while scanning something else
    Imports = 4,
}

/// Compute the content identity used for staleness checks.
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Resolve symlinks and relative components of `path`.
///
/// A file that does not exist yet is placed under its canonical parent; a
/// path whose parent cannot be resolved either is kept as given.
pub(crate) fn canonical_path(path: PathBuf) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let resolved = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            parent.canonicalize().ok().map(|p| p.join(name))
        }
        _ => None,
    };
    resolved.unwrap_or(path)
}

/// One unit of indexing work.
pub struct ScanRequest {
    id: OnceLock<RequestId>,
    path: PathBuf,
    language: String,
    priority: Priority,
    force: bool,
    scan_imports: bool,
    content: Mutex<Option<Arc<str>>>,
    mtime: Mutex<Option<DateTime<Utc>>>,
    digest: OnceLock<String>,
    on_complete: Mutex<Option<CompletionCallback>>,
    completed: AtomicBool,
    done: Mutex<bool>,
    done_cv: Condvar,
    done_tx: watch::Sender<bool>,
}

impl ScanRequest {
    /// Create a request that will read its content from `path`.
    ///
    /// The path is canonicalized so requests reached through symlinks share
    /// the index of the real directory.
    pub fn new(path: impl Into<PathBuf>, language: impl Into<String>, priority: Priority) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            id: OnceLock::new(),
            path: canonical_path(path.into()),
            language: language.into(),
            priority,
            force: false,
            scan_imports: true,
            content: Mutex::new(None),
            mtime: Mutex::new(None),
            digest: OnceLock::new(),
            on_complete: Mutex::new(None),
            completed: AtomicBool::new(false),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            done_tx,
        }
    }

    /// Scan even if the index says the file is unchanged.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Scan this text instead of the file on disk.
    ///
    /// Without an explicit mtime the request is stamped with the current
    /// time, since the text need not match what is on disk.
    pub fn with_content(mut self, content: impl Into<Arc<str>>) -> Self {
        *self.content.get_mut() = Some(content.into());
        let mtime = self.mtime.get_mut();
        if mtime.is_none() {
            *mtime = Some(Utc::now());
        }
        self
    }

    pub fn with_mtime(mut self, mtime: DateTime<Utc>) -> Self {
        *self.mtime.get_mut() = Some(mtime);
        self
    }

    /// Use a digest computed by the caller.
    pub fn with_digest(self, digest: impl Into<String>) -> Self {
        let _ = self.digest.set(digest.into());
        self
    }

    pub fn scan_imports(mut self, scan_imports: bool) -> Self {
        self.scan_imports = scan_imports;
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        *self.on_complete.get_mut() = Some(Box::new(callback));
        self
    }

    /// Identifier assigned at submission, if submitted.
    pub fn id(&self) -> Option<RequestId> {
        self.id.get().copied()
    }

    pub(crate) fn assign_id(&self, id: RequestId) -> bool {
        self.id.set(id).is_ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn wants_imports(&self) -> bool {
        self.scan_imports
    }

    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        *self.mtime.lock()
    }

    /// Base-name of the file within its directory.
    pub fn base_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    /// Make sure the content is available, reading the file if none was supplied.
    pub fn ensure_content_loaded(&self) -> Result<Arc<str>, IndexerError> {
        let mut content = self.content.lock();
        if let Some(text) = content.as_ref() {
            return Ok(text.clone());
        }

        let bytes = std::fs::read(&self.path).map_err(|source| IndexerError::ContentUnavailable {
            path: self.path.clone(),
            source,
        })?;

        let mut mtime = self.mtime.lock();
        if mtime.is_none() {
            *mtime = std::fs::metadata(&self.path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
        }

        // Hash the raw bytes; lossy decoding would hide changes in invalid UTF-8.
        let _ = self.digest.set(content_digest(&bytes));

        let text: Arc<str> = String::from_utf8_lossy(&bytes).into();
        *content = Some(text.clone());
        Ok(text)
    }

    /// Content digest, computed on first use.
    pub fn ensure_digest(&self) -> Result<&str, IndexerError> {
        if let Some(digest) = self.digest.get() {
            return Ok(digest);
        }
        let content = self.ensure_content_loaded()?;
        Ok(self.digest.get_or_init(|| content_digest(content.as_bytes())))
    }

    /// Whether [`complete`](Self::complete) has run.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Fire the completion signal.
    ///
    /// Only the first call has any effect; it returns `true`. A panicking
    /// callback is logged and does not stop waiters from being released.
    pub fn complete(&self) -> bool {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(callback)) {
                error!(
                    path = ?self.path,
                    language = %self.language,
                    reason = %panic_message(panic.as_ref()),
                    "Completion callback panicked"
                );
            }
        }

        {
            let mut done = self.done.lock();
            *done = true;
            self.done_cv.notify_all();
        }
        self.done_tx.send_replace(true);

        true
    }

    /// Wait for completion. Returns `false` if `timeout` elapsed first.
    ///
    /// Timing out does not cancel the scan.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.done_tx.subscribe();
        let completed = match timeout {
            None => rx.wait_for(|done| *done).await.is_ok(),
            Some(limit) => matches!(
                tokio::time::timeout(limit, rx.wait_for(|done| *done)).await,
                Ok(Ok(_))
            ),
        };
        completed
    }

    /// Blocking variant of [`wait`](Self::wait) for non-async callers.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> bool {
        let mut done = self.done.lock();
        match timeout {
            None => {
                while !*done {
                    self.done_cv.wait(&mut done);
                }
                true
            }
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while !*done {
                    if self.done_cv.wait_until(&mut done, deadline).timed_out() {
                        return *done;
                    }
                }
                true
            }
        }
    }
}

impl fmt::Debug for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRequest")
            .field("id", &self.id())
            .field("path", &self.path)
            .field("language", &self.language)
            .field("priority", &self.priority)
            .field("force", &self.force)
            .field("complete", &self.is_complete())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    #[test]
    fn test_supplied_content_sets_mtime() {
        let before = Utc::now();
        let req = ScanRequest::new("/src/a.py", "Python", Priority::Current).with_content("x = 1");
        let mtime = req.mtime().unwrap();
        assert!(mtime >= before);
        assert_eq!(&*req.ensure_content_loaded().unwrap(), "x = 1");
    }

    #[test]
    fn test_explicit_mtime_kept_with_content() {
        let stamp = DateTime::from_timestamp(1_000_000, 0).unwrap();
        let req = ScanRequest::new("/src/a.py", "Python", Priority::Current)
            .with_mtime(stamp)
            .with_content("x = 1");
        assert_eq!(req.mtime(), Some(stamp));
    }

    #[test]
    fn test_content_loaded_from_disk() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("mod.py");
        std::fs::write(&path, "def f(): pass\n").unwrap();

        let req = ScanRequest::new(&path, "Python", Priority::Background);
        assert!(req.mtime().is_none());
        assert_eq!(&*req.ensure_content_loaded().unwrap(), "def f(): pass\n");
        assert!(req.mtime().is_some());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let req = ScanRequest::new("/definitely/not/here.py", "Python", Priority::Background);
        let err = req.ensure_content_loaded().unwrap_err();
        assert!(matches!(err, IndexerError::ContentUnavailable { .. }));
        assert!(req.ensure_digest().is_err());
    }

    #[test]
    fn test_digest_memoized() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("m.py");
        std::fs::write(&path, "a").unwrap();

        let req = ScanRequest::new(&path, "Python", Priority::Background);
        let first = req.ensure_digest().unwrap().to_string();
        assert_eq!(first, content_digest(b"a"));

        // The file changing underneath does not change the memoized digest.
        std::fs::write(&path, "b").unwrap();
        assert_eq!(req.ensure_digest().unwrap(), first);
    }

    #[test]
    fn test_digest_covers_invalid_utf8_bytes() {
        let temp_dir = tempdir().unwrap();
        let first = temp_dir.path().join("first.py");
        let second = temp_dir.path().join("second.py");
        std::fs::write(&first, b"x = '\xff'").unwrap();
        std::fs::write(&second, b"x = '\xfe'").unwrap();

        let a = ScanRequest::new(&first, "Python", Priority::Background);
        let b = ScanRequest::new(&second, "Python", Priority::Background);
        assert_eq!(a.ensure_content_loaded().unwrap(), b.ensure_content_loaded().unwrap());
        assert_ne!(a.ensure_digest().unwrap(), b.ensure_digest().unwrap());
        assert_eq!(a.ensure_digest().unwrap(), content_digest(b"x = '\xff'"));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_resolved_through_symlink() {
        let temp_dir = tempdir().unwrap();
        let real = temp_dir.path().join("real");
        std::fs::create_dir_all(&real).unwrap();
        std::fs::write(real.join("a.py"), "a = 1").unwrap();
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let real = real.canonicalize().unwrap();

        let existing = ScanRequest::new(link.join("a.py"), "Python", Priority::Open);
        assert_eq!(existing.path(), real.join("a.py"));

        // Not on disk yet: only the directory can be resolved.
        let unsaved = ScanRequest::new(link.join("new.py"), "Python", Priority::Open);
        assert_eq!(unsaved.path(), real.join("new.py"));
    }

    #[test]
    fn test_supplied_digest_used() {
        let req = ScanRequest::new("/nope.py", "Python", Priority::Open).with_digest("abc");
        assert_eq!(req.ensure_digest().unwrap(), "abc");
    }

    #[test]
    fn test_complete_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let req = ScanRequest::new("/a.py", "Python", Priority::Open).on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(req.complete());
        assert!(!req.complete());
        assert!(!req.complete());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(req.is_complete());
    }

    #[test]
    fn test_panicking_callback_still_completes() {
        let req = ScanRequest::new("/a.py", "Python", Priority::Open)
            .on_complete(|| panic!("callback failure"));
        assert!(req.complete());
        assert!(req.wait_blocking(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_wait_blocking_timeout() {
        let req = ScanRequest::new("/a.py", "Python", Priority::Open);
        assert!(!req.wait_blocking(Some(Duration::from_millis(20))));
    }

    #[test]
    fn test_wait_blocking_released_by_other_thread() {
        let req = Arc::new(ScanRequest::new("/a.py", "Python", Priority::Open));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let req = req.clone();
                std::thread::spawn(move || req.wait_blocking(None))
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        req.complete();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[tokio::test]
    async fn test_async_wait() {
        let req = Arc::new(ScanRequest::new("/a.py", "Python", Priority::Open));
        assert!(!req.wait(Some(Duration::from_millis(10))).await);

        let completer = req.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete();
        });

        assert!(req.wait(Some(Duration::from_secs(5))).await);
        // Already complete: returns immediately.
        assert!(req.wait(None).await);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Immediate < Priority::Current);
        assert!(Priority::Background < Priority::Imports);
    }
}
