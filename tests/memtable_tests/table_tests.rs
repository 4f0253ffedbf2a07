//! MemTable Tests
//!
//! Tests verify:
//! - Batch application and point lookups
//! - Tombstone handling
//! - Footprint tracking and the full/overflow checks
//! - Generation discovery
//! - Close idempotency

use std::path::Path;

use bytes::Bytes;
use smartstash::config::{Config, WalSyncStrategy, WriteOptions};
use smartstash::memtable::{MemTable, MemTableEntry, MemTableOptions};
use smartstash::wal::LogRecord;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn table_options(dir: &Path, id: u32) -> MemTableOptions {
    MemTableOptions {
        id,
        dir: dir.to_path_buf(),
        size_limit: 1 << 20,
        segment_size: 1 << 20,
        sync_strategy: WalSyncStrategy::Manual,
        block_cache_bytes: 0,
    }
}

fn setup_temp_table() -> (TempDir, MemTable) {
    let temp_dir = TempDir::new().unwrap();
    let table: MemTable = MemTable::open(table_options(temp_dir.path(), 1)).unwrap();
    (temp_dir, table)
}

fn value(v: &'static str) -> Option<MemTableEntry> {
    Some(MemTableEntry::Value(Bytes::from_static(v.as_bytes())))
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let (_temp, table) = setup_temp_table();
    assert_eq!(table.id(), 1);
    assert_eq!(table.len(), 0);
    assert_eq!(table.footprint(), 0);
    assert!(table.is_empty());
    assert!(!table.is_full());
}

#[test]
fn test_put_batch_and_get() {
    let (_temp, table) = setup_temp_table();

    let records = vec![
        LogRecord::put("key1", "value1"),
        LogRecord::put("key2", "value2"),
    ];
    table.put_batch(records, 1, &WriteOptions::default()).unwrap();

    assert_eq!(table.get(b"key1"), value("value1"));
    assert_eq!(table.get(b"key2"), value("value2"));
    assert_eq!(table.get(b"missing"), None);
    assert_eq!(table.len(), 2);
}

#[test]
fn test_delete_creates_tombstone() {
    let (_temp, table) = setup_temp_table();

    table
        .put_batch(vec![LogRecord::put("key1", "value1")], 1, &WriteOptions::default())
        .unwrap();
    table
        .put_batch(vec![LogRecord::delete("key1")], 2, &WriteOptions::default())
        .unwrap();

    assert_eq!(table.get(b"key1"), Some(MemTableEntry::Tombstone));
    // Tombstone still counts as an entry
    assert_eq!(table.len(), 1);
}

#[test]
fn test_later_batch_overwrites() {
    let (_temp, table) = setup_temp_table();

    table
        .put_batch(vec![LogRecord::put("k", "old")], 1, &WriteOptions::default())
        .unwrap();
    table
        .put_batch(vec![LogRecord::put("k", "new")], 2, &WriteOptions::default())
        .unwrap();

    assert_eq!(table.get(b"k"), value("new"));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_entries_sorted() {
    let (_temp, table) = setup_temp_table();

    let records = ["cherry", "apple", "banana"]
        .into_iter()
        .map(|k| LogRecord::put(k, "v"))
        .collect();
    table.put_batch(records, 1, &WriteOptions::default()).unwrap();

    let keys: Vec<Bytes> = table.entries().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["apple", "banana", "cherry"]);
}

#[test]
fn test_sync_write_option() {
    let (_temp, table) = setup_temp_table();
    let options = WriteOptions {
        sync: true,
        disable_wal: false,
    };
    table
        .put_batch(vec![LogRecord::put("k", "v")], 1, &options)
        .unwrap();
    assert_eq!(table.get(b"k"), value("v"));
}

// =============================================================================
// Size Tracking Tests
// =============================================================================

#[test]
fn test_footprint_tracks_replacements() {
    let (_temp, table) = setup_temp_table();

    table
        .put_batch(vec![LogRecord::put("key", "0123456789")], 1, &WriteOptions::default())
        .unwrap();
    let with_long_value = table.footprint();
    assert!(with_long_value > 0);

    table
        .put_batch(vec![LogRecord::put("key", "01")], 2, &WriteOptions::default())
        .unwrap();
    assert_eq!(table.footprint(), with_long_value - 8);

    table
        .put_batch(vec![LogRecord::delete("key")], 3, &WriteOptions::default())
        .unwrap();
    assert_eq!(table.footprint(), with_long_value - 10);
}

#[test]
fn test_is_full_and_would_overflow() {
    let temp_dir = TempDir::new().unwrap();
    let mut options = table_options(temp_dir.path(), 1);
    options.size_limit = 200;
    let table: MemTable = MemTable::open(options).unwrap();

    assert!(!table.would_overflow(200));
    assert!(table.would_overflow(201));

    let mut batch_id = 0;
    while !table.is_full() {
        batch_id += 1;
        let key = format!("key-{}", batch_id);
        table
            .put_batch(vec![LogRecord::put(key, "value")], batch_id, &WriteOptions::default())
            .unwrap();
    }
    assert!(table.footprint() >= 200);
    assert!(table.would_overflow(1));
}

// =============================================================================
// Generation Discovery Tests
// =============================================================================

#[test]
fn test_open_all_empty_dir() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    let tables: Vec<MemTable> = MemTable::open_all(&config).unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].id(), 1);
}

#[test]
fn test_open_all_finds_generations_in_order() {
    let temp_dir = TempDir::new().unwrap();
    for id in [3, 1, 2] {
        let table: MemTable = MemTable::open(table_options(temp_dir.path(), id)).unwrap();
        let key = format!("gen-{}", id);
        table
            .put_batch(vec![LogRecord::put(key, "v")], id as u64, &WriteOptions::default())
            .unwrap();
        table.close().unwrap();
    }

    let config = Config::builder().data_dir(temp_dir.path()).build();
    let tables: Vec<MemTable> = MemTable::open_all(&config).unwrap();
    let ids: Vec<u32> = tables.iter().map(|t| t.id()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(tables[1].get(b"gen-2"), value("v"));
    assert_eq!(tables[1].get(b"gen-3"), None);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_close_is_idempotent() {
    let (_temp, table) = setup_temp_table();
    table
        .put_batch(vec![LogRecord::put("k", "v")], 1, &WriteOptions::default())
        .unwrap();

    table.close().unwrap();
    table.close().unwrap();

    // Index stays readable; the WAL takes no more writes
    assert_eq!(table.get(b"k"), value("v"));
    assert!(table
        .put_batch(vec![LogRecord::put("k2", "v")], 2, &WriteOptions::default())
        .is_err());
    assert_eq!(table.get(b"k2"), None);
}
