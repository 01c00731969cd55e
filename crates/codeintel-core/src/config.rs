//! Configuration for the indexing engine.

use crate::{CoreError, ResourceResolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Root directory holding the per-directory index files
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Number of scheduler worker tasks
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Compare area prefixes ignoring ASCII case
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive_paths: bool,

    /// Named base directories used for area-relative references
    #[serde(default)]
    pub areas: BTreeMap<String, PathBuf>,

    /// Filesystem watching
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Directory watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Invalidate scanned directories when their files change
    #[serde(default)]
    pub enabled: bool,

    /// Debounce window in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codeintel")
}

fn default_storage_dir() -> PathBuf {
    default_data_dir().join("index")
}

fn default_worker_count() -> usize {
    2
}

fn default_case_insensitive() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            worker_count: default_worker_count(),
            case_insensitive_paths: default_case_insensitive(),
            areas: BTreeMap::new(),
            watch: WatchConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        let config_path = default_data_dir().join("config.yaml");

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Ensure the storage root exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.storage_dir)
    }

    /// Build the area resolver described by this configuration
    pub fn resolver(&self) -> Result<ResourceResolver, CoreError> {
        let mut resolver = ResourceResolver::new(self.case_insensitive_paths);
        for (name, base) in &self.areas {
            resolver.register(name, base)?;
        }
        Ok(resolver)
    }
}
