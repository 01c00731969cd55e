//! Priority queue of pending scans.
//!
//! Ordered by `(priority, insertion order)`. Requests for a file that is
//! already queued join the queued slot instead of adding a second scan; if
//! the newcomer is more urgent the slot is re-queued at the new priority and
//! the old heap entry goes stale. A slot remembers the sequence number of its
//! live heap entry, and sequence numbers are never reused, so a stale entry
//! cannot match a slot created later for the same file.

use crate::request::{Priority, ScanRequest};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

type SlotKey = (PathBuf, String);

struct HeapEntry {
    priority: Priority,
    seq: u64,
    key: SlotKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap: the most urgent, oldest entry must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Slot {
    requests: Vec<Arc<ScanRequest>>,
    priority: Priority,
    /// Sequence number of the heap entry that currently represents this slot
    seq: u64,
}

/// Requests for one file, scanned once and completed together.
pub(crate) struct Batch {
    pub requests: Vec<Arc<ScanRequest>>,
}

impl Batch {
    /// The most recently submitted request; its content is the freshest.
    pub fn primary(&self) -> Option<&Arc<ScanRequest>> {
        self.requests.last()
    }

    pub fn force(&self) -> bool {
        self.requests.iter().any(|r| r.is_forced())
    }

    pub fn scan_imports(&self) -> bool {
        self.requests.iter().any(|r| r.wants_imports())
    }

    pub fn complete_all(&self) {
        for request in &self.requests {
            request.complete();
        }
    }
}

#[derive(Default)]
pub(crate) struct ScanQueue {
    heap: BinaryHeap<HeapEntry>,
    slots: HashMap<SlotKey, Slot>,
    next_seq: u64,
}

impl ScanQueue {
    /// Queue a request. Returns `true` if it joined an already queued slot.
    pub fn push(&mut self, request: Arc<ScanRequest>) -> bool {
        let key = (
            request.path().to_path_buf(),
            request.language().to_string(),
        );
        let priority = request.priority();

        if let Some(slot) = self.slots.get_mut(&key) {
            slot.requests.push(request);
            if priority < slot.priority {
                let seq = self.next_seq;
                self.next_seq += 1;
                slot.priority = priority;
                slot.seq = seq;
                self.heap.push(HeapEntry { priority, seq, key });
            }
            return true;
        }

        let seq = self.bump_seq();
        self.slots.insert(
            key.clone(),
            Slot {
                requests: vec![request],
                priority,
                seq,
            },
        );
        self.heap.push(HeapEntry { priority, seq, key });
        false
    }

    /// Take the most urgent slot.
    pub fn pop(&mut self) -> Option<Batch> {
        while let Some(entry) = self.heap.pop() {
            let current = matches!(
                self.slots.get(&entry.key),
                Some(slot) if slot.seq == entry.seq
            );
            if !current {
                continue;
            }
            if let Some(slot) = self.slots.remove(&entry.key) {
                return Some(Batch {
                    requests: slot.requests,
                });
            }
        }
        None
    }

    /// Number of distinct files waiting.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Remove everything still queued.
    pub fn drain(&mut self) -> Vec<Batch> {
        self.heap.clear();
        self.slots
            .drain()
            .map(|(_, slot)| Batch {
                requests: slot.requests,
            })
            .collect()
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
