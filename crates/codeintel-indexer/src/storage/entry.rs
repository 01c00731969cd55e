//! Index records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last-scanned record for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// File name relative to its directory
    pub base_name: String,
    /// SHA-256 of the content that was scanned
    pub digest: String,
    /// Modification time of the scanned content, if known
    pub mtime: Option<DateTime<Utc>>,
    /// Engine-owned handle to the scan result
    pub summary_ref: String,
    /// When the scan finished
    pub scanned_at: DateTime<Utc>,
}

/// All entries for one directory, keyed by base-name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl DirIndex {
    pub fn get(&self, base_name: &str) -> Option<&IndexEntry> {
        self.entries.get(base_name)
    }

    /// Insert or replace the entry for its base-name.
    pub fn insert(&mut self, entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.insert(entry.base_name.clone(), entry)
    }

    pub fn remove(&mut self, base_name: &str) -> Option<IndexEntry> {
        self.entries.remove(base_name)
    }

    pub fn base_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
