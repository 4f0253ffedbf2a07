//! Sorted index capability
//!
//! What a memtable needs from its index: ordered iteration plus logarithmic
//! point lookup and insert. The table serializes access with its own lock,
//! so implementations need no interior synchronization.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::MemTableEntry;

pub trait SortedIndex: Default + Send + Sync {
    fn get(&self, key: &[u8]) -> Option<&MemTableEntry>;

    /// Insert or replace; returns the replaced entry
    fn insert(&mut self, key: Bytes, entry: MemTableEntry) -> Option<MemTableEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in ascending key order
    fn iter(&self) -> Box<dyn Iterator<Item = (&Bytes, &MemTableEntry)> + '_>;
}

/// `BTreeMap`-backed index
#[derive(Debug, Default)]
pub struct BTreeIndex {
    map: BTreeMap<Bytes, MemTableEntry>,
}

impl SortedIndex for BTreeIndex {
    fn get(&self, key: &[u8]) -> Option<&MemTableEntry> {
        self.map.get(key)
    }

    fn insert(&mut self, key: Bytes, entry: MemTableEntry) -> Option<MemTableEntry> {
        self.map.insert(key, entry)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&Bytes, &MemTableEntry)> + '_> {
        Box::new(self.map.iter())
    }
}
