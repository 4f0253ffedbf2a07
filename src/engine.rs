//! Engine Module
//!
//! `Db`: the thin database layer around the memtable generations.
//!
//! ## Responsibilities
//! - Own the data directory: create it, hold its `FLOCK` lock
//! - Open every memtable generation on startup (each replays its WAL)
//! - Rotate to a new generation when the active one fills up
//! - Hand out pooled batches bound to the database lock
//!
//! ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
//!
//! One `RwLock` over [`DbState`]. A write batch holds it exclusively from
//! creation to commit; read-only batches share it. Memtable indexes have
//! their own locks, taken only around lookups and the apply step.
//!
//! A thread holding a write batch must not call anything else on the same
//! `Db` that takes the lock (`get`, `put`, `stats`, another `batch`): the
//! lock is not reentrant.

use std::fs;
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::batch::Batch;
use crate::config::{BatchOptions, Config, WriteOptions};
use crate::error::Result;
use crate::flock::FileLock;
use crate::id::{IdGenerator, PersistentIdGenerator};
use crate::memtable::{MemTable, MemTableOptions, INITIAL_TABLE_ID};
use crate::pool::BatchPool;

/// Idle batches kept for reuse
const BATCH_POOL_CAPACITY: usize = 64;

/// Everything the database lock protects
pub(crate) struct DbState {
    /// Generation taking writes
    pub(crate) active: MemTable,
    /// Superseded generations, oldest first; read-only
    pub(crate) immutables: Vec<MemTable>,
    pub(crate) closed: bool,
}

/// State shared with bound batches
pub(crate) struct DbShared {
    pub(crate) config: Config,
    pub(crate) state: Arc<RwLock<DbState>>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    file_lock: Mutex<Option<FileLock>>,
}

impl DbShared {
    /// Start a new generation if the active one is full, or if it already
    /// holds data and `projected` more bytes would overflow it.
    pub(crate) fn ensure_room(&self, state: &mut DbState, projected: u64) -> Result<()> {
        let active = &state.active;
        if !active.is_full() && (active.is_empty() || !active.would_overflow(projected)) {
            return Ok(());
        }

        let next_id = active.id() + 1;
        let table = MemTable::open(MemTableOptions::from_config(&self.config, next_id))?;
        let old = mem::replace(&mut state.active, table);
        state.immutables.push(old);

        // No more writes reach the old generation; its index stays readable
        // even if closing its WAL fails
        let sealed = &state.immutables[state.immutables.len() - 1];
        sealed.close()?;
        info!(
            sealed = sealed.id(),
            active = next_id,
            footprint = sealed.footprint(),
            "rotated memtable generation"
        );
        Ok(())
    }
}

/// Point-in-time numbers for a database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    pub generations: usize,
    pub active_generation: u32,
    /// Keys across all generations, tombstones included
    pub keys: usize,
    /// Index footprint across all generations
    pub footprint: u64,
}

/// An open database
pub struct Db {
    shared: Arc<DbShared>,
    pool: BatchPool,
}

impl Db {
    /// Open or create the database in `config.data_dir`
    pub fn open(config: Config) -> Result<Self> {
        Self::open_inner(config, None)
    }

    /// Open with an injected batch id generator
    pub fn open_with_generator(config: Config, ids: Arc<dyn IdGenerator>) -> Result<Self> {
        Self::open_inner(config, Some(ids))
    }

    fn open_inner(config: Config, ids: Option<Arc<dyn IdGenerator>>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let file_lock = FileLock::acquire(&config.data_dir)?;

        let ids = match ids {
            Some(ids) => ids,
            None => Arc::new(PersistentIdGenerator::open(&config.data_dir)?),
        };

        let mut immutables = MemTable::open_all(&config)?;
        let active = match immutables.pop() {
            Some(table) => table,
            None => MemTable::open(MemTableOptions::from_config(&config, INITIAL_TABLE_ID))?,
        };
        for table in &immutables {
            table.close()?;
        }

        info!(
            data_dir = %config.data_dir.display(),
            generations = immutables.len() + 1,
            active = active.id(),
            "opened database"
        );

        Ok(Self {
            shared: Arc::new(DbShared {
                config,
                state: Arc::new(RwLock::new(DbState {
                    active,
                    immutables,
                    closed: false,
                })),
                ids,
                file_lock: Mutex::new(Some(file_lock)),
            }),
            pool: BatchPool::new(BATCH_POOL_CAPACITY),
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// A pooled batch bound to this database; blocks until the lock is free
    pub fn batch(&self, options: BatchOptions) -> Batch {
        let mut batch = self.pool.get();
        batch.init(options, Arc::clone(&self.shared));
        batch
    }

    /// Reset `batch` and return it to the pool
    pub fn release(&self, batch: Batch) {
        self.pool.put(batch);
    }

    // =========================================================================
    // Single-Key Operations
    // =========================================================================

    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.write_one(|batch| batch.put(key, value))
    }

    pub fn delete(&self, key: impl Into<Bytes>) -> Result<()> {
        self.write_one(|batch| batch.delete(key))
    }

    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        let mut batch = self.batch(BatchOptions::read_only());
        let result = batch.get(key);
        batch.rollback();
        self.release(batch);
        result
    }

    fn write_one(&self, stage: impl FnOnce(&Batch) -> Result<()>) -> Result<()> {
        let mut batch = self.batch(BatchOptions::default());
        let result = stage(&batch).and_then(|_| batch.commit(&WriteOptions::default()));
        self.release(batch);
        result
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close every generation and release the directory lock; later calls
    /// do nothing.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write();
            if state.closed {
                return Ok(());
            }
            for table in &state.immutables {
                table.close()?;
            }
            state.active.close()?;
            state.closed = true;
        }

        if let Some(lock) = self.shared.file_lock.lock().take() {
            lock.release();
        }
        info!(data_dir = %self.shared.config.data_dir.display(), "closed database");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.read().closed
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Active plus immutable generations
    pub fn generation_count(&self) -> usize {
        self.shared.state.read().immutables.len() + 1
    }

    pub fn active_generation_id(&self) -> u32 {
        self.shared.state.read().active.id()
    }

    pub fn stats(&self) -> DbStats {
        let state = self.shared.state.read();
        let tables: Vec<&MemTable> = std::iter::once(&state.active)
            .chain(state.immutables.iter())
            .collect();
        DbStats {
            generations: tables.len(),
            active_generation: state.active.id(),
            keys: tables.iter().map(|t| t.len()).sum(),
            footprint: tables.iter().map(|t| t.footprint()).sum(),
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        // A batch still holding the lock would block a full close
        if self.shared.state.try_write().is_none() {
            warn!("database dropped while a batch holds its lock, skipping close");
            return;
        }
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close database on drop");
        }
    }
}
