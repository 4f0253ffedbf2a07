//! Batch Tests
//!
//! Tests verify:
//! - Batches become visible all at once on commit
//! - Reads inside a batch see its own pending writes
//! - Batch state errors (read-only, committed, rolled back)
//! - Pooled batches come back reset

use bytes::Bytes;
use smartstash::config::KB;
use smartstash::{Batch, BatchOptions, Config, Db, StashError, WriteOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, Db) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    let db = Db::open(config).unwrap();
    (temp_dir, db)
}

// =============================================================================
// Commit Tests
// =============================================================================

#[test]
fn test_commit_applies_every_write() {
    let (_temp_dir, db) = setup_temp_db();
    db.put("stale", "v").unwrap();

    let mut batch = db.batch(BatchOptions::default());
    batch.put("a", "1").unwrap();
    batch.put("b", "2").unwrap();
    batch.delete("stale").unwrap();
    assert_eq!(batch.len(), 3);
    batch.commit(&WriteOptions::default()).unwrap();
    assert!(batch.is_committed());
    db.release(batch);

    assert_eq!(db.get(b"a").unwrap(), Bytes::from("1"));
    assert_eq!(db.get(b"b").unwrap(), Bytes::from("2"));
    assert!(matches!(db.get(b"stale"), Err(StashError::KeyNotFound)));
}

#[test]
fn test_last_write_per_key_wins() {
    let (_temp_dir, db) = setup_temp_db();

    let mut batch = db.batch(BatchOptions::default());
    batch.put("k", "first").unwrap();
    batch.delete("k").unwrap();
    batch.put("k", "last").unwrap();
    assert_eq!(batch.len(), 1);
    batch.commit(&WriteOptions::default()).unwrap();
    db.release(batch);

    assert_eq!(db.get(b"k").unwrap(), Bytes::from("last"));
}

#[test]
fn test_commit_with_sync_and_without_wal() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    {
        let db = Db::open(config.clone()).unwrap();

        let mut batch = db.batch(BatchOptions::default());
        batch.put("durable", "v").unwrap();
        batch
            .commit(&WriteOptions {
                sync: true,
                disable_wal: false,
            })
            .unwrap();
        db.release(batch);

        let mut batch = db.batch(BatchOptions::default());
        batch.put("volatile", "v").unwrap();
        batch
            .commit(&WriteOptions {
                sync: false,
                disable_wal: true,
            })
            .unwrap();
        db.release(batch);

        assert_eq!(db.get(b"volatile").unwrap(), Bytes::from("v"));
        db.close().unwrap();
    }

    let db = Db::open(config).unwrap();
    assert_eq!(db.get(b"durable").unwrap(), Bytes::from("v"));
    assert!(matches!(db.get(b"volatile"), Err(StashError::KeyNotFound)));
}

#[test]
fn test_commit_twice_fails() {
    let (_temp_dir, db) = setup_temp_db();

    let mut batch = db.batch(BatchOptions::default());
    batch.put("k", "v").unwrap();
    batch.commit(&WriteOptions::default()).unwrap();

    assert!(matches!(
        batch.commit(&WriteOptions::default()),
        Err(StashError::BatchCommitted)
    ));
    assert!(matches!(batch.put("k2", "v"), Err(StashError::BatchCommitted)));
    db.release(batch);
}

#[test]
fn test_failed_commit_releases_lock() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .segment_size_limit(4 * KB)
        .build();
    let db = Db::open(config).unwrap();

    let mut batch = db.batch(BatchOptions::default());
    batch.put("big", vec![0u8; 8 * KB as usize]).unwrap();
    let result = batch.commit(&WriteOptions::default());
    assert!(matches!(
        result,
        Err(StashError::PendingSizeTooLarge { max, .. }) if max == 4 * KB
    ));

    // The batch is neither released nor dropped, yet the lock is free
    db.put("after", "v").unwrap();
    assert_eq!(db.get(b"after").unwrap(), Bytes::from("v"));
    assert!(matches!(db.get(b"big"), Err(StashError::KeyNotFound)));
    assert!(matches!(
        batch.commit(&WriteOptions::default()),
        Err(StashError::BatchNotActive)
    ));
    db.release(batch);
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_reads_see_pending_writes() {
    let (_temp_dir, db) = setup_temp_db();
    db.put("committed", "old").unwrap();
    db.put("doomed", "v").unwrap();

    let mut batch = db.batch(BatchOptions::default());
    batch.put("committed", "new").unwrap();
    batch.put("fresh", "v").unwrap();
    batch.delete("doomed").unwrap();

    assert_eq!(batch.get(b"committed").unwrap(), Bytes::from("new"));
    assert_eq!(batch.get(b"fresh").unwrap(), Bytes::from("v"));
    assert!(matches!(batch.get(b"doomed"), Err(StashError::KeyNotFound)));

    batch.rollback();
    db.release(batch);

    assert_eq!(db.get(b"committed").unwrap(), Bytes::from("old"));
    assert_eq!(db.get(b"doomed").unwrap(), Bytes::from("v"));
    assert!(matches!(db.get(b"fresh"), Err(StashError::KeyNotFound)));
}

#[test]
fn test_read_only_batch() {
    let (_temp_dir, db) = setup_temp_db();
    db.put("k", "v").unwrap();

    let mut batch = db.batch(BatchOptions::read_only());
    assert_eq!(batch.get(b"k").unwrap(), Bytes::from("v"));
    assert!(matches!(batch.put("x", "y"), Err(StashError::ReadOnlyBatch)));
    assert!(matches!(batch.delete("k"), Err(StashError::ReadOnlyBatch)));

    // Committing a read-only batch only releases the lock
    batch.commit(&WriteOptions::default()).unwrap();
    db.release(batch);
    assert_eq!(db.get(b"k").unwrap(), Bytes::from("v"));
}

#[test]
fn test_read_only_batches_share_the_lock() {
    let (_temp_dir, db) = setup_temp_db();
    db.put("k", "v").unwrap();

    let mut first = db.batch(BatchOptions::read_only());
    let mut second = db.batch(BatchOptions::read_only());
    assert_eq!(first.get(b"k").unwrap(), second.get(b"k").unwrap());

    first.rollback();
    second.rollback();
    db.release(first);
    db.release(second);
}

// =============================================================================
// Rollback and Pool Tests
// =============================================================================

#[test]
fn test_rollback_discards_and_deactivates() {
    let (_temp_dir, db) = setup_temp_db();

    let mut batch = db.batch(BatchOptions::default());
    batch.put("k", "v").unwrap();
    batch.rollback();

    assert!(batch.is_empty());
    assert!(matches!(batch.put("k", "v"), Err(StashError::BatchNotActive)));
    assert!(matches!(
        batch.commit(&WriteOptions::default()),
        Err(StashError::BatchNotActive)
    ));
    db.release(batch);

    assert!(matches!(db.get(b"k"), Err(StashError::KeyNotFound)));
}

#[test]
fn test_unbound_batch_is_inactive() {
    let mut batch = Batch::new();
    assert!(matches!(batch.put("k", "v"), Err(StashError::BatchNotActive)));
    assert!(matches!(batch.get(b"k"), Err(StashError::BatchNotActive)));
    assert!(matches!(
        batch.commit(&WriteOptions::default()),
        Err(StashError::BatchNotActive)
    ));
}

#[test]
fn test_released_batch_comes_back_clean() {
    let (_temp_dir, db) = setup_temp_db();

    let mut batch = db.batch(BatchOptions::default());
    batch.put("k", "v").unwrap();
    batch.commit(&WriteOptions::default()).unwrap();
    db.release(batch);

    let batch = db.batch(BatchOptions::read_only());
    assert!(!batch.is_committed());
    assert!(batch.is_empty());
    assert_eq!(batch.options(), BatchOptions::read_only());
    db.release(batch);
}

#[test]
fn test_dropped_batch_releases_lock() {
    let (_temp_dir, db) = setup_temp_db();
    {
        let batch = db.batch(BatchOptions::default());
        batch.put("k", "v").unwrap();
    }

    // Would block forever if the dropped batch still held the write lock
    db.put("k", "other").unwrap();
    assert_eq!(db.get(b"k").unwrap(), Bytes::from("other"));
}
