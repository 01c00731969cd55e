//! Seam to the per-language content parsers.
//!
//! The indexer never parses source itself. A [`LanguageEngine`] turns text
//! into a symbol summary it owns and tells the indexer which files in a
//! directory are worth indexing.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of scanning one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Opaque handle to the engine's stored scan result
    pub summary_ref: String,
    /// Files this one imports, eligible for follow-up scans
    pub dependencies: Vec<PathBuf>,
}

impl ScanSummary {
    pub fn new(summary_ref: impl Into<String>) -> Self {
        Self {
            summary_ref: summary_ref.into(),
            dependencies: Vec::new(),
        }
    }
}

/// A per-language content parser.
pub trait LanguageEngine: Send + Sync {
    /// Parse `content` (the current text of `path`) into a summary.
    fn scan(
        &self,
        path: &Path,
        content: &str,
        mtime: Option<DateTime<Utc>>,
    ) -> anyhow::Result<ScanSummary>;

    /// Base-names in `directory` that this language indexes.
    fn list_importables(&self, directory: &Path) -> std::io::Result<BTreeSet<String>>;
}

/// Language tag to engine mapping.
#[derive(Default)]
pub struct EngineRegistry {
    engines: RwLock<HashMap<String, Arc<dyn LanguageEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the engine for `language`.
    pub fn register(&self, language: impl Into<String>, engine: Arc<dyn LanguageEngine>) {
        let language = language.into();
        tracing::debug!(language = %language, "Registered language engine");
        self.engines.write().insert(language, engine);
    }

    pub fn get(&self, language: &str) -> Option<Arc<dyn LanguageEngine>> {
        self.engines.read().get(language).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    impl LanguageEngine for Nothing {
        fn scan(
            &self,
            _path: &Path,
            _content: &str,
            _mtime: Option<DateTime<Utc>>,
        ) -> anyhow::Result<ScanSummary> {
            Ok(ScanSummary::new("none"))
        }

        fn list_importables(&self, _directory: &Path) -> std::io::Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = EngineRegistry::new();
        assert!(registry.get("Python").is_none());

        registry.register("Python", Arc::new(Nothing));
        registry.register("JavaScript", Arc::new(Nothing));

        assert!(registry.get("Python").is_some());
        assert!(registry.get("JavaScript").is_some());
        assert!(registry.get("python").is_none());
    }
}
