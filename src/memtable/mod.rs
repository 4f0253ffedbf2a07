//! MemTable Module
//!
//! One generation of the write path: a sorted in-memory index backed by a
//! private Tiny WAL.
//!
//! ## Responsibilities
//! - Point lookups that tell tombstones apart from absent keys
//! - Log a whole batch to the WAL before any of it reaches the index
//! - Rebuild the index on open by replaying the WAL, batch by batch
//! - Track the index footprint that drives generation rotation
//!
//! ## Data Structure Choice
//! The index sits behind the [`SortedIndex`] trait. [`BTreeIndex`] wraps a
//! `BTreeMap` and is the default; the table guards it with one `RwLock`.

mod index;
mod table;

use bytes::Bytes;

pub use index::{BTreeIndex, SortedIndex};
pub use table::{entry_footprint, MemTable, MemTableOptions, ReplayStats, INITIAL_TABLE_ID};

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemTableEntry {
    /// A live value
    Value(Bytes),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    /// Bytes held by the value, 0 for a tombstone
    pub fn value_len(&self) -> usize {
        match self {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        }
    }
}
