//! Block cache
//!
//! Bounded cache of complete 32 KiB blocks keyed by (segment id, block
//! index), shared by every segment of one WAL. Eviction is a CLOCK sweep:
//! blocks read since the last sweep get a second chance.
//!
//! Only full blocks are ever inserted. A block that is still being appended
//! to is always read from disk.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::wal::{SegmentId, BLOCK_SIZE};

/// (segment id, block index)
pub type BlockKey = (SegmentId, u32);

struct CachedBlock {
    data: Bytes,
    referenced: bool,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<BlockKey, CachedBlock>,
    /// Sweep order; may hold keys already removed by `remove_segment`
    queue: VecDeque<BlockKey>,
}

pub struct BlockCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl BlockCache {
    /// Cache holding at most `capacity` blocks
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Cache sized in bytes; `None` when the budget is below one block
    pub fn with_bytes(bytes: u64) -> Option<Self> {
        let blocks = (bytes / BLOCK_SIZE as u64) as usize;
        (blocks > 0).then(|| Self::new(blocks))
    }

    pub fn get(&self, key: &BlockKey) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.referenced = true;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: BlockKey, data: Bytes) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.data = data;
            return;
        }

        while inner.entries.len() >= self.capacity {
            let Some(victim) = inner.queue.pop_front() else {
                break;
            };
            match inner.entries.get_mut(&victim) {
                Some(entry) if entry.referenced => {
                    entry.referenced = false;
                    inner.queue.push_back(victim);
                }
                Some(_) => {
                    inner.entries.remove(&victim);
                }
                None => {}
            }
        }

        inner.entries.insert(
            key,
            CachedBlock {
                data,
                referenced: false,
            },
        );
        inner.queue.push_back(key);
    }

    /// Drop every block belonging to `segment_id`
    pub fn remove_segment(&self, segment_id: SegmentId) {
        let mut inner = self.inner.lock();
        inner.entries.retain(|(id, _), _| *id != segment_id);
        inner.queue.retain(|(id, _)| *id != segment_id);
    }

    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (hits, misses)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
