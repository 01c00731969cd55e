//! Persistence layer for per-directory indexes.
//!
//! Each (language, directory) pair owns one MessagePack file under the
//! storage root recording, per base-name, the content digest that was last
//! scanned and the engine's summary handle. Files are replaced atomically
//! and a file that fails to decode is treated as an empty index.

mod entry;

pub use entry::{DirIndex, IndexEntry};

use crate::IndexerError;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Version written into every index file.
pub const INDEX_FORMAT_VERSION: u32 = 1;

const INDEX_FILE: &str = "index.msgpack";
const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Identifies one directory index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub directory: PathBuf,
    pub language: String,
}

impl IndexKey {
    pub fn new(directory: &Path, language: &str) -> Self {
        Self {
            directory: directory.to_path_buf(),
            language: language.to_string(),
        }
    }
}

/// Outcome of reading an index file from disk.
#[derive(Debug)]
pub enum LoadOutcome {
    /// No index has been written for this directory yet
    Missing,
    /// The file exists but could not be decoded
    Corrupt(String),
    Loaded(DirIndex),
}

impl LoadOutcome {
    pub fn into_index(self) -> DirIndex {
        match self {
            LoadOutcome::Loaded(index) => index,
            LoadOutcome::Missing | LoadOutcome::Corrupt(_) => DirIndex::default(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    directory: PathBuf,
    language: String,
    index: DirIndex,
}

/// Durable store of directory indexes.
pub struct IndexStore {
    root: PathBuf,
    cache: Mutex<LruCache<IndexKey, Arc<DirIndex>>>,
    locks: Mutex<HashMap<IndexKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexStore {
    /// Create a store rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self::with_cache_capacity(root, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a store keeping at most `capacity` indexes in memory.
    pub fn with_cache_capacity(root: PathBuf, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            root,
            cache: Mutex::new(LruCache::new(capacity)),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that the storage root can be created and written.
    pub async fn verify_root(&self) -> Result<(), IndexerError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| IndexerError::Storage(format!("{}: {}", self.root.display(), e)))?;

        let metadata = tokio::fs::metadata(&self.root).await?;
        if metadata.permissions().readonly() {
            return Err(IndexerError::Storage(format!(
                "{} is read-only",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Location of the index file for a directory.
    pub fn index_path(&self, directory: &Path, language: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(directory.to_string_lossy().as_bytes());
        let dir_hash = format!("{:x}", hasher.finalize())[..16].to_string();

        self.root
            .join(language_dir_name(language))
            .join(dir_hash)
            .join(INDEX_FILE)
    }

    /// Snapshot of a directory's index. Missing or corrupt files yield an
    /// empty index.
    pub async fn load(&self, directory: &Path, language: &str) -> Result<DirIndex, IndexerError> {
        let key = IndexKey::new(directory, language);
        let cached = self.cache.lock().get(&key).cloned();
        if let Some(index) = cached {
            return Ok(DirIndex::clone(&index));
        }

        let index = self.read(&key).await?.into_index();

        // A writer may have cached a newer index while the file was read.
        let mut cache = self.cache.lock();
        if !cache.contains(&key) {
            cache.put(key, Arc::new(index.clone()));
        }
        Ok(index)
    }

    /// Read the index file directly, reporting why it may be empty.
    pub async fn read(&self, key: &IndexKey) -> Result<LoadOutcome, IndexerError> {
        let path = self.index_path(&key.directory, &key.language);

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
            Err(e) => return Err(e.into()),
        };

        let outcome = match rmp_serde::from_slice::<PersistedIndex>(&data) {
            Ok(persisted) if persisted.version != INDEX_FORMAT_VERSION => {
                LoadOutcome::Corrupt(format!("unsupported version {}", persisted.version))
            }
            Ok(persisted)
                if persisted.directory != key.directory || persisted.language != key.language =>
            {
                LoadOutcome::Corrupt(format!(
                    "index belongs to {} ({})",
                    persisted.directory.display(),
                    persisted.language
                ))
            }
            Ok(persisted) => LoadOutcome::Loaded(persisted.index),
            Err(e) => LoadOutcome::Corrupt(e.to_string()),
        };

        match &outcome {
            LoadOutcome::Corrupt(reason) => {
                warn!(path = ?path, reason = %reason, "Discarding unreadable index");
            }
            LoadOutcome::Loaded(index) => {
                debug!(path = ?path, entries = index.len(), "Loaded index");
            }
            LoadOutcome::Missing => {}
        }

        Ok(outcome)
    }

    /// Replace a directory's index.
    pub async fn save(
        &self,
        directory: &Path,
        language: &str,
        index: &DirIndex,
    ) -> Result<(), IndexerError> {
        let key = IndexKey::new(directory, language);
        let lock = self.dir_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.persist(&key, index).await
        };
        drop(lock);
        self.release_dir_lock(&key);
        result
    }

    /// Read-modify-write a directory's index under its writer lock.
    ///
    /// The index is re-read from disk under the lock, so a snapshot cached
    /// by a concurrent reader never becomes the base of a write. The file is
    /// rewritten only when `f` changed the index.
    pub async fn update<F, R>(
        &self,
        directory: &Path,
        language: &str,
        f: F,
    ) -> Result<R, IndexerError>
    where
        F: FnOnce(&mut DirIndex) -> R,
    {
        let key = IndexKey::new(directory, language);
        let lock = self.dir_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.update_locked(&key, f).await
        };
        drop(lock);
        self.release_dir_lock(&key);
        result
    }

    async fn update_locked<F, R>(&self, key: &IndexKey, f: F) -> Result<R, IndexerError>
    where
        F: FnOnce(&mut DirIndex) -> R,
    {
        let mut index = self.read(key).await?.into_index();
        let before = index.clone();
        let result = f(&mut index);

        if index != before {
            self.persist(key, &index).await?;
        } else {
            self.cache.lock().put(key.clone(), Arc::new(index));
        }

        Ok(result)
    }

    /// Drop one entry. Returns whether it existed.
    pub async fn remove(
        &self,
        directory: &Path,
        language: &str,
        base_name: &str,
    ) -> Result<bool, IndexerError> {
        self.update(directory, language, |index| index.remove(base_name).is_some())
            .await
    }

    /// Whether a file with `current_digest` needs rescanning.
    pub fn is_stale(entry: Option<&IndexEntry>, current_digest: &str) -> bool {
        match entry {
            Some(entry) => entry.digest != current_digest,
            None => true,
        }
    }

    /// Forget the cached copy of an index so the next load rereads the file.
    pub fn evict(&self, directory: &Path, language: &str) {
        self.cache.lock().pop(&IndexKey::new(directory, language));
    }

    fn dir_lock(&self, key: &IndexKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the writer lock for `key` once no task holds or awaits it.
    fn release_dir_lock(&self, key: &IndexKey) {
        let mut locks = self.locks.lock();
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }

    async fn persist(&self, key: &IndexKey, index: &DirIndex) -> Result<(), IndexerError> {
        let path = self.index_path(&key.directory, &key.language);
        let dir = path
            .parent()
            .ok_or_else(|| IndexerError::Storage(format!("bad index path {}", path.display())))?;
        tokio::fs::create_dir_all(dir).await?;

        let persisted = PersistedIndex {
            version: INDEX_FORMAT_VERSION,
            directory: key.directory.clone(),
            language: key.language.clone(),
            index: index.clone(),
        };
        let data = rmp_serde::to_vec_named(&persisted)?;

        // Atomic write: uniquely named temp file in the same directory, then rename
        let size = data.len();
        let dir = dir.to_path_buf();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::Builder::new()
                .prefix(".index.")
                .suffix(".tmp")
                .tempfile_in(&dir)?;
            temp.write_all(&data)?;
            temp.as_file().sync_all()?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| IndexerError::Storage(format!("index write task failed: {}", e)))??;

        self.cache.lock().put(key.clone(), Arc::new(index.clone()));

        debug!(path = ?path, entries = index.len(), size, "Saved index");

        Ok(())
    }
}

fn language_dir_name(language: &str) -> String {
    language
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
