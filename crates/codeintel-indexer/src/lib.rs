//! Codeintel Indexer
//!
//! This crate provides the incremental indexing engine behind code
//! intelligence, including:
//! - Scan requests with lazy content loading and exactly-once completion
//! - A priority scheduler with request coalescing and a worker pool
//! - Per-directory persisted indexes with digest-based staleness checks
//! - Directory passes that rescan only what changed and prune vanished files
//! - File watching that invalidates directories on change

pub mod controller;
pub mod engine;
mod error;
mod indexer;
pub mod request;
pub mod scanner;
pub mod scheduler;
pub mod storage;
pub mod watcher;

pub use controller::{AbortController, Controller, NullController, ProgressReporter, TracingReporter};
pub use engine::{EngineRegistry, LanguageEngine, ScanSummary};
pub use error::IndexerError;
pub use indexer::{Indexer, WatchHandle};
pub use request::{content_digest, Priority, RequestId, ScanRequest};
pub use scanner::{DirScanReport, DirectoryScanner};
pub use scheduler::{Scheduler, SchedulerOptions, SchedulerStats};
pub use storage::{DirIndex, IndexEntry, IndexKey, IndexStore, LoadOutcome};
pub use watcher::{ChangeKind, FileChange, FileWatcher, WatcherOptions};
