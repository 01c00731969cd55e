//! Cooperative cancellation and progress reporting.
//!
//! Long directory-wide passes consult a [`Controller`] between files and
//! between directories. A scan that already started always runs to
//! completion; aborting only stops the next one from starting.

use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation and progress handle for directory-wide operations.
pub trait Controller: Send + Sync {
    /// Whether the caller asked to stop.
    fn is_aborted(&self) -> bool;

    /// Progress notification.
    fn info(&self, _msg: &str) {}
}

/// Controller that never aborts and discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullController;

impl Controller for NullController {
    fn is_aborted(&self) -> bool {
        false
    }
}

/// Controller backed by an atomic abort flag; progress goes to the log.
#[derive(Debug, Default)]
pub struct AbortController {
    aborted: AtomicBool,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current pass stop at the next boundary.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

impl Controller for AbortController {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn info(&self, msg: &str) {
        tracing::debug!(detail = %msg, "Progress");
    }
}

/// Sink for host-visible events such as "started indexing a new directory".
pub trait ProgressReporter: Send + Sync {
    fn report_event(&self, message: &str);
}

/// Reporter that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report_event(&self, message: &str) {
        tracing::info!("{}", message);
    }
}
