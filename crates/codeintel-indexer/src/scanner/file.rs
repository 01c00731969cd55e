//! Scanning a single file against its stored index entry.

use crate::engine::LanguageEngine;
use crate::request::ScanRequest;
use crate::storage::{IndexEntry, IndexStore};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What happened to one file.
#[derive(Debug)]
pub(crate) enum FileScanOutcome {
    /// Digest matches the stored entry; the engine was not called
    Unchanged,
    /// Engine produced a summary; `entry` should replace the stored one
    Scanned {
        entry: IndexEntry,
        dependencies: Vec<PathBuf>,
    },
    /// Content could not be loaded
    Skipped,
    /// The engine reported an error or panicked
    Failed,
}

/// Load, digest and (if stale or forced) scan the request's file.
///
/// Runs engine code, so call it from a blocking context.
pub(crate) fn scan_file(
    engine: &dyn LanguageEngine,
    request: &ScanRequest,
    stored: Option<&IndexEntry>,
    force: bool,
) -> FileScanOutcome {
    let path = request.path();
    let language = request.language();

    let Some(base_name) = request.base_name() else {
        warn!(path = ?path, language = %language, "Scan target has no file name");
        return FileScanOutcome::Skipped;
    };

    let content = match request.ensure_content_loaded() {
        Ok(content) => content,
        Err(e) => {
            warn!(path = ?path, language = %language, error = %e, "Skipping unreadable file");
            return FileScanOutcome::Skipped;
        }
    };
    let digest = match request.ensure_digest() {
        Ok(digest) => digest.to_string(),
        Err(e) => {
            warn!(path = ?path, language = %language, error = %e, "Skipping unreadable file");
            return FileScanOutcome::Skipped;
        }
    };

    if !force && !IndexStore::is_stale(stored, &digest) {
        debug!(path = ?path, "Unchanged since last scan");
        return FileScanOutcome::Unchanged;
    }

    match engine.scan(path, &content, request.mtime()) {
        Ok(summary) => {
            debug!(path = ?path, language = %language, forced = force, "Scanned");
            FileScanOutcome::Scanned {
                entry: IndexEntry {
                    base_name,
                    digest,
                    mtime: request.mtime(),
                    summary_ref: summary.summary_ref,
                    scanned_at: Utc::now(),
                },
                dependencies: summary.dependencies,
            }
        }
        Err(e) => {
            error!(path = ?path, language = %language, error = %format!("{:#}", e), "Scan failed");
            FileScanOutcome::Failed
        }
    }
}

/// [`scan_file`] on the blocking pool. A panicking engine counts as a failure.
pub(crate) async fn run_file_scan(
    engine: Arc<dyn LanguageEngine>,
    request: Arc<ScanRequest>,
    stored: Option<IndexEntry>,
    force: bool,
) -> FileScanOutcome {
    let path = request.path().to_path_buf();
    let language = request.language().to_string();

    let task = tokio::task::spawn_blocking(move || {
        scan_file(engine.as_ref(), &request, stored.as_ref(), force)
    });

    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(path = ?path, language = %language, error = %e, "Scan task aborted");
            FileScanOutcome::Failed
        }
    }
}
