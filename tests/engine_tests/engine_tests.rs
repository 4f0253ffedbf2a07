//! Db Tests
//!
//! Tests verify:
//! - Single-key put/get/delete and persistence across reopen
//! - Directory locking
//! - Generation rotation and cross-generation reads
//! - Concurrent writers
//! - Close and drop behavior

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use smartstash::config::KB;
use smartstash::{Config, Db, IdGenerator, SequenceGenerator, StashError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &TempDir) -> Config {
    Config::builder().data_dir(dir.path()).build()
}

fn small_generations(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .memtable_size_limit(256)
        .segment_size_limit(4 * KB)
        .build()
}

fn setup_temp_db() -> (TempDir, Db) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::open(config_for(&temp_dir)).unwrap();
    (temp_dir, db)
}

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[test]
fn test_put_get_delete() {
    let (_temp_dir, db) = setup_temp_db();

    db.put("name", "stash").unwrap();
    assert_eq!(db.get(b"name").unwrap(), Bytes::from("stash"));

    db.put("name", "renamed").unwrap();
    assert_eq!(db.get(b"name").unwrap(), Bytes::from("renamed"));

    db.delete("name").unwrap();
    assert!(matches!(db.get(b"name"), Err(StashError::KeyNotFound)));
    assert!(matches!(db.get(b"never"), Err(StashError::KeyNotFound)));
}

#[test]
fn test_empty_key_rejected() {
    let (_temp_dir, db) = setup_temp_db();

    assert!(matches!(db.put("", "v"), Err(StashError::KeyEmpty)));
    assert!(matches!(db.delete(""), Err(StashError::KeyEmpty)));
    assert!(matches!(db.get(b""), Err(StashError::KeyEmpty)));
}

#[test]
fn test_data_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = Db::open(config_for(&temp_dir)).unwrap();
        db.put("kept", "value").unwrap();
        db.put("gone", "value").unwrap();
        db.delete("gone").unwrap();
        db.close().unwrap();
    }

    let db = Db::open(config_for(&temp_dir)).unwrap();
    assert_eq!(db.get(b"kept").unwrap(), Bytes::from("value"));
    assert!(matches!(db.get(b"gone"), Err(StashError::KeyNotFound)));
}

#[test]
fn test_batch_ids_keep_growing_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    for round in 0..3 {
        let db = Db::open(config_for(&temp_dir)).unwrap();
        db.put(format!("round-{}", round), "v").unwrap();
        db.close().unwrap();
    }

    let db = Db::open(config_for(&temp_dir)).unwrap();
    for round in 0..3 {
        assert!(db.get(format!("round-{}", round).as_bytes()).is_ok());
    }
}

// =============================================================================
// Locking Tests
// =============================================================================

#[test]
fn test_second_open_is_rejected() {
    let (temp_dir, _db) = setup_temp_db();

    let second = Db::open(config_for(&temp_dir));
    assert!(matches!(second, Err(StashError::DatabaseInUse)));
}

#[test]
fn test_close_releases_directory() {
    let (temp_dir, db) = setup_temp_db();
    db.put("k", "v").unwrap();
    db.close().unwrap();

    let reopened = Db::open(config_for(&temp_dir)).unwrap();
    assert_eq!(reopened.get(b"k").unwrap(), Bytes::from("v"));
}

#[test]
fn test_drop_releases_directory() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = Db::open(config_for(&temp_dir)).unwrap();
        db.put("k", "v").unwrap();
    }

    let db = Db::open(config_for(&temp_dir)).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Bytes::from("v"));
}

#[test]
fn test_operations_after_close() {
    let (_temp_dir, db) = setup_temp_db();
    db.close().unwrap();
    db.close().unwrap();

    assert!(db.is_closed());
    assert!(matches!(db.put("k", "v"), Err(StashError::DbClosed)));
    assert!(matches!(db.get(b"k"), Err(StashError::DbClosed)));
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(0)
        .build();

    assert!(matches!(Db::open(config), Err(StashError::Config(_))));
}

// =============================================================================
// Generation Tests
// =============================================================================

#[test]
fn test_rotation_starts_new_generations() {
    let temp_dir = TempDir::new().unwrap();
    let value = "v".repeat(64);
    {
        let db = Db::open(small_generations(&temp_dir)).unwrap();
        assert_eq!(db.generation_count(), 1);

        for i in 0..10 {
            db.put(format!("key-{:02}", i), value.clone()).unwrap();
        }
        assert!(db.generation_count() >= 3);
        assert_eq!(db.active_generation_id() as usize, db.generation_count());

        let stats = db.stats();
        assert_eq!(stats.keys, 10);
        assert_eq!(stats.generations, db.generation_count());
        db.close().unwrap();
    }

    let db = Db::open(small_generations(&temp_dir)).unwrap();
    assert!(db.generation_count() >= 3);
    for i in 0..10 {
        assert_eq!(
            db.get(format!("key-{:02}", i).as_bytes()).unwrap(),
            Bytes::from(value.clone())
        );
    }
}

#[test]
fn test_newest_generation_wins() {
    let temp_dir = TempDir::new().unwrap();
    let filler = "f".repeat(64);
    {
        let db = Db::open(small_generations(&temp_dir)).unwrap();
        db.put("shadowed", "old").unwrap();
        db.put("deleted", "old").unwrap();
        for i in 0..4 {
            db.put(format!("filler-{}", i), filler.clone()).unwrap();
        }
        assert!(db.generation_count() > 1);

        db.put("shadowed", "new").unwrap();
        db.delete("deleted").unwrap();
        assert_eq!(db.get(b"shadowed").unwrap(), Bytes::from("new"));
        assert!(matches!(db.get(b"deleted"), Err(StashError::KeyNotFound)));
        db.close().unwrap();
    }

    let db = Db::open(small_generations(&temp_dir)).unwrap();
    assert_eq!(db.get(b"shadowed").unwrap(), Bytes::from("new"));
    assert!(matches!(db.get(b"deleted"), Err(StashError::KeyNotFound)));
}

#[test]
fn test_oversized_batch_fits_in_empty_generation() {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::open(small_generations(&temp_dir)).unwrap();

    // Far past the 256 byte limit, but the active generation is empty
    db.put("big", "b".repeat(1024)).unwrap();
    assert_eq!(db.generation_count(), 1);

    db.put("next", "v").unwrap();
    assert_eq!(db.generation_count(), 2);
}

// =============================================================================
// Id Generator Tests
// =============================================================================

#[test]
fn test_injected_generator_supplies_batch_ids() {
    let temp_dir = TempDir::new().unwrap();
    let ids = Arc::new(SequenceGenerator::new());
    let db = Db::open_with_generator(config_for(&temp_dir), ids.clone()).unwrap();

    db.put("a", "1").unwrap();
    db.put("b", "2").unwrap();

    // Empty and read-only commits take no id
    let mut batch = db.batch(Default::default());
    batch.commit(&Default::default()).unwrap();
    db.release(batch);

    assert_eq!(ids.generate().unwrap(), 3);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers() {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(Db::open(config_for(&temp_dir)).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..50 {
                    db.put(format!("t{}-k{}", t, i), format!("{}", i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.stats().keys, 400);
    db.close().unwrap();
    drop(db);

    let db = Db::open(config_for(&temp_dir)).unwrap();
    for t in 0..8 {
        for i in 0..50 {
            let value = db.get(format!("t{}-k{}", t, i).as_bytes()).unwrap();
            assert_eq!(value, Bytes::from(format!("{}", i)));
        }
    }
}

#[test]
fn test_concurrent_readers_and_writer() {
    let (_temp_dir, db) = setup_temp_db();
    db.put("shared", "0").unwrap();
    let db = Arc::new(db);

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 1..=100 {
                db.put("shared", format!("{}", i)).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..100 {
                    let value = db.get(b"shared").unwrap();
                    let n: u32 = std::str::from_utf8(&value).unwrap().parse().unwrap();
                    assert!(n <= 100);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(db.get(b"shared").unwrap(), Bytes::from("100"));
}
