//! Batch
//!
//! One atomic multi-key write, or a consistent point read. A batch takes the
//! database lock when it is bound (shared when read-only, exclusive
//! otherwise) and holds it until commit, rollback or drop.
//!
//! Batches come from a pool and must be reset before going back to it; see
//! [`crate::pool::BatchPool`].

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock};

use crate::config::{BatchOptions, WriteOptions};
use crate::engine::{DbShared, DbState};
use crate::error::{Result, StashError};
use crate::memtable::{entry_footprint, MemTableEntry};
use crate::wal::LogRecord;

/// The database lock a bound batch holds
enum DbLock {
    Shared(ArcRwLockReadGuard<RawRwLock, DbState>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, DbState>),
}

impl DbLock {
    fn state(&self) -> &DbState {
        match self {
            DbLock::Shared(guard) => &**guard,
            DbLock::Exclusive(guard) => &**guard,
        }
    }
}

pub struct Batch {
    db: Option<Arc<DbShared>>,
    lock: Option<DbLock>,
    /// Last write per key wins
    pending: Mutex<HashMap<Bytes, LogRecord>>,
    options: BatchOptions,
    committed: bool,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    /// An unbound batch; bind it with [`crate::Db::batch`]
    pub fn new() -> Self {
        Self {
            db: None,
            lock: None,
            pending: Mutex::new(HashMap::new()),
            options: BatchOptions::default(),
            committed: false,
        }
    }

    /// Bind to `db` and take its lock for the batch's lifetime
    pub(crate) fn init(&mut self, options: BatchOptions, db: Arc<DbShared>) {
        let lock = if options.read_only {
            DbLock::Shared(db.state.read_arc())
        } else {
            DbLock::Exclusive(db.state.write_arc())
        };
        self.lock = Some(lock);
        self.db = Some(db);
        self.options = options;
        self.committed = false;
    }

    pub fn options(&self) -> BatchOptions {
        self.options
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Number of keys with a pending write
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    // =========================================================================
    // Buffered Writes
    // =========================================================================

    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let record = LogRecord::put(key, value);
        self.check_writable(&record.key)?;
        self.pending.lock().insert(record.key.clone(), record);
        Ok(())
    }

    pub fn delete(&self, key: impl Into<Bytes>) -> Result<()> {
        let record = LogRecord::delete(key);
        self.check_writable(&record.key)?;
        self.pending.lock().insert(record.key.clone(), record);
        Ok(())
    }

    fn check_writable(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StashError::KeyEmpty);
        }
        let state = self.state()?;
        if state.closed {
            return Err(StashError::DbClosed);
        }
        if self.options.read_only {
            return Err(StashError::ReadOnlyBatch);
        }
        Ok(())
    }

    fn state(&self) -> Result<&DbState> {
        match &self.lock {
            Some(lock) => Ok(lock.state()),
            None if self.committed => Err(StashError::BatchCommitted),
            None => Err(StashError::BatchNotActive),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Own pending writes first, then generations newest to oldest
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        if key.is_empty() {
            return Err(StashError::KeyEmpty);
        }
        let state = self.state()?;
        if state.closed {
            return Err(StashError::DbClosed);
        }

        if let Some(record) = self.pending.lock().get(key) {
            return if record.is_deleted() {
                Err(StashError::KeyNotFound)
            } else {
                Ok(record.value.clone())
            };
        }

        let newest_first = std::iter::once(&state.active).chain(state.immutables.iter().rev());
        for table in newest_first {
            match table.get(key) {
                Some(MemTableEntry::Value(value)) => return Ok(value),
                Some(MemTableEntry::Tombstone) => return Err(StashError::KeyNotFound),
                None => {}
            }
        }
        Err(StashError::KeyNotFound)
    }

    // =========================================================================
    // Commit / Rollback
    // =========================================================================

    /// Make every pending write durable and visible as one unit.
    ///
    /// The database lock is released before this returns, on every path. A
    /// batch whose commit failed cannot be retried; release it to the pool.
    pub fn commit(&mut self, options: &WriteOptions) -> Result<()> {
        if self.committed {
            return Err(StashError::BatchCommitted);
        }
        let Some(lock) = self.lock.take() else {
            return Err(StashError::BatchNotActive);
        };

        let DbLock::Exclusive(mut state) = lock else {
            self.committed = true;
            return Ok(());
        };
        if state.closed {
            return Err(StashError::DbClosed);
        }

        let records: Vec<LogRecord> = mem::take(&mut *self.pending.lock()).into_values().collect();
        if records.is_empty() {
            self.committed = true;
            return Ok(());
        }

        let db = self.db.as_ref().ok_or(StashError::BatchNotActive)?;
        let projected = records
            .iter()
            .map(|r| entry_footprint(r.key.len(), r.value.len()))
            .sum();
        db.ensure_room(&mut state, projected)?;

        let batch_id = db.ids.generate()?;
        let write_options = WriteOptions {
            sync: options.sync || self.options.sync,
            ..*options
        };
        state.active.put_batch(records, batch_id, &write_options)?;

        self.committed = true;
        Ok(())
    }

    /// Drop pending writes and release the lock without committing
    pub fn rollback(&mut self) {
        self.pending.lock().clear();
        self.lock = None;
    }

    /// Back to the unbound state a pooled batch must be in
    pub fn reset(&mut self) {
        self.pending.lock().clear();
        self.lock = None;
        self.db = None;
        self.options = BatchOptions::default();
        self.committed = false;
    }
}
