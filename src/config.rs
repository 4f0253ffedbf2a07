//! Configuration for SmartStash
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StashError};

pub const B: u64 = 1;
pub const KB: u64 = 1024 * B;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;

/// Main configuration for a SmartStash instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── FLOCK                     (exclusive process lock)
    ///     ├── BATCH_ID                  (batch id lease)
    ///     └── 0000000001.SEG.{table}    (memtable WAL segments)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Max size of one WAL segment file before rotation (in bytes)
    pub segment_size_limit: u64,

    /// Bytes of sealed blocks kept in the read cache (0 disables it)
    pub block_cache_bytes: u64,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max index footprint of a memtable before a new generation starts (in bytes)
    pub memtable_size_limit: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync once at least `bytes` have been written since the last sync
    EveryNBytes { bytes: u64 },

    /// Only sync on rotation, on request, or when a write asks for it
    Manual,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./smartstash_data"),
            wal_sync_strategy: WalSyncStrategy::Manual,
            segment_size_limit: GB,
            block_cache_bytes: 0,
            memtable_size_limit: 64 * MB,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings that can never hold a single record
    pub fn validate(&self) -> Result<()> {
        if self.segment_size_limit == 0 {
            return Err(StashError::Config("segment_size_limit must be > 0".into()));
        }
        if self.memtable_size_limit == 0 {
            return Err(StashError::Config("memtable_size_limit must be > 0".into()));
        }
        if let WalSyncStrategy::EveryNBytes { bytes: 0 } = self.wal_sync_strategy {
            return Err(StashError::Config(
                "EveryNBytes needs a non-zero threshold".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL segment size limit (in bytes)
    pub fn segment_size_limit(mut self, size: u64) -> Self {
        self.config.segment_size_limit = size;
        self
    }

    /// Set the block cache size (in bytes)
    pub fn block_cache_bytes(mut self, size: u64) -> Self {
        self.config.block_cache_bytes = size;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: u64) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Per-commit write options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// fsync the WAL before the commit returns
    pub sync: bool,

    /// Skip the WAL entirely; the batch is lost on crash
    pub disable_wal: bool,
}

/// Options fixed when a batch is drawn from the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub read_only: bool,

    /// Sync hint, OR-ed into the commit's WriteOptions
    pub sync: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            sync: true,
        }
    }
}

impl BatchOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            sync: false,
        }
    }
}
