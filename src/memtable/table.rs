//! MemTable implementation
//!
//! Index behind a `RwLock`, WAL files in the data directory named
//! `<segment id>.SEG.<table id>` so generations never collide on disk.
//!
//! Replay buffers each batch's records until its BatchEnd record arrives, so
//! it holds at most the records of the batches still open at crash time. Only
//! the largest such batch matters in practice: batch ids are unique and the
//! database lock lets one batch commit at a time.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{Config, WalSyncStrategy, WriteOptions};
use crate::error::Result;
use crate::wal::{LogRecord, LogRecordType, TinyWal, WalOptions, WalReader};

use super::{BTreeIndex, MemTableEntry, SortedIndex};

/// Id of the first generation in an empty data directory
pub const INITIAL_TABLE_ID: u32 = 1;

/// WAL files of table `id` end in `.SEG.<id>`
const WAL_EXTENSION_MARKER: &str = ".SEG.";

/// Approximate per-entry bookkeeping cost in the index
const ENTRY_OVERHEAD: u64 = 32;

#[derive(Debug, Clone)]
pub struct MemTableOptions {
    pub id: u32,
    /// Directory holding this table's WAL files
    pub dir: PathBuf,
    /// Index footprint at which the table reports full
    pub size_limit: u64,
    pub segment_size: u64,
    pub sync_strategy: WalSyncStrategy,
    pub block_cache_bytes: u64,
}

impl MemTableOptions {
    pub fn from_config(config: &Config, id: u32) -> Self {
        Self {
            id,
            dir: config.data_dir.clone(),
            size_limit: config.memtable_size_limit,
            segment_size: config.segment_size_limit,
            sync_strategy: config.wal_sync_strategy,
            block_cache_bytes: config.block_cache_bytes,
        }
    }

    pub fn wal_extension(&self) -> String {
        format!("{}{}", WAL_EXTENSION_MARKER, self.id)
    }

    fn wal_options(&self) -> WalOptions {
        WalOptions {
            dir: self.dir.clone(),
            extension: self.wal_extension(),
            segment_size: self.segment_size,
            sync_strategy: self.sync_strategy,
            block_cache_bytes: self.block_cache_bytes,
        }
    }
}

/// What one replay found
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records made visible
    pub records: u64,
    /// Batches closed by a BatchEnd record
    pub batches: u64,
    /// Batches never closed; none of their records became visible
    pub discarded_batches: u64,
    /// Offset the active segment was cut back to after a torn tail
    pub truncated_at: Option<u64>,
}

/// Index footprint of one entry
pub fn entry_footprint(key_len: usize, value_len: usize) -> u64 {
    key_len as u64 + value_len as u64 + ENTRY_OVERHEAD
}

pub struct MemTable<I: SortedIndex = BTreeIndex> {
    options: MemTableOptions,
    index: RwLock<I>,
    footprint: AtomicU64,
    wal: TinyWal,
    replay_stats: ReplayStats,
}

impl<I: SortedIndex> MemTable<I> {
    /// Open every generation found in `config.data_dir`, oldest first.
    ///
    /// An empty directory yields one fresh table with `INITIAL_TABLE_ID`.
    pub fn open_all(config: &Config) -> Result<Vec<Self>> {
        fs::create_dir_all(&config.data_dir)?;

        let mut ids = BTreeSet::new();
        for entry in fs::read_dir(&config.data_dir)? {
            let name = entry?.file_name();
            if let Some(id) = name.to_str().and_then(parse_table_id) {
                ids.insert(id);
            }
        }
        if ids.is_empty() {
            ids.insert(INITIAL_TABLE_ID);
        }

        ids.into_iter()
            .map(|id| Self::open(MemTableOptions::from_config(config, id)))
            .collect()
    }

    /// Open the table's WAL and rebuild the index from it
    pub fn open(options: MemTableOptions) -> Result<Self> {
        let wal = TinyWal::open(options.wal_options())?;
        let mut table = Self {
            options,
            index: RwLock::new(I::default()),
            footprint: AtomicU64::new(0),
            wal,
            replay_stats: ReplayStats::default(),
        };

        table.replay_stats = table.replay()?;
        info!(
            table = table.id(),
            keys = table.len(),
            records = table.replay_stats.records,
            batches = table.replay_stats.batches,
            discarded_batches = table.replay_stats.discarded_batches,
            "opened memtable"
        );
        Ok(table)
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    fn replay(&self) -> Result<ReplayStats> {
        let mut stats = ReplayStats::default();
        let mut open_batches: HashMap<u64, Vec<LogRecord>> = HashMap::new();

        let torn_tail = {
            let mut reader = self.wal.new_reader()?;
            self.replay_from(&mut reader, &mut open_batches, &mut stats)?
        };

        if let Some(offset) = torn_tail {
            warn!(
                table = self.id(),
                offset,
                discarded_bytes = self.wal.active_size().saturating_sub(offset),
                "cutting torn tail off the active segment"
            );
            self.wal.truncate_active(offset)?;
            stats.truncated_at = Some(offset);
        }
        stats.discarded_batches = open_batches.len() as u64;
        if stats.discarded_batches > 0 {
            warn!(
                table = self.id(),
                batches = stats.discarded_batches,
                "discarded batches without a BatchEnd record"
            );
        }
        Ok(stats)
    }

    /// Apply every closed batch; returns the active-segment offset to cut
    /// back to when the log ends in a torn tail. A checksummed record that
    /// does not decode is an error.
    fn replay_from(
        &self,
        reader: &mut WalReader<'_>,
        open_batches: &mut HashMap<u64, Vec<LogRecord>>,
        stats: &mut ReplayStats,
    ) -> Result<Option<u64>> {
        loop {
            let (data, position) = match reader.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => return Ok(None),
                Err(e) if e.is_integrity() => {
                    if reader.on_active_segment() {
                        warn!(
                            table = self.id(),
                            segment = ?reader.current_segment_id(),
                            offset = reader.current_offset(),
                            error = %e,
                            "torn WAL tail, treating as end of log"
                        );
                        return Ok(Some(reader.current_offset()));
                    }
                    warn!(
                        table = self.id(),
                        segment = ?reader.current_segment_id(),
                        error = %e,
                        "corrupt sealed segment, skipping its remainder"
                    );
                    reader.skip_segment();
                    continue;
                }
                Err(e) => return Err(e),
            };

            // The chunk passed its checksum: not a torn write
            let record = LogRecord::decode(&data).map_err(|e| {
                error!(
                    table = self.id(),
                    segment = position.segment_id,
                    offset = position.file_offset(),
                    error = %e,
                    "undecodable WAL record with a valid checksum"
                );
                e
            })?;

            match record.record_type {
                LogRecordType::BatchEnd => {
                    stats.batches += 1;
                    if let Some(records) = open_batches.remove(&record.batch_id) {
                        stats.records += records.len() as u64;
                        self.apply(records);
                    }
                }
                LogRecordType::Normal | LogRecordType::Deleted => {
                    open_batches.entry(record.batch_id).or_default().push(record);
                }
            }
        }
    }

    // =========================================================================
    // Read / Write
    // =========================================================================

    /// `None` when absent, `Some(Tombstone)` when deleted in this generation
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.index.read().get(key).cloned()
    }

    /// Log `records` as batch `batch_id`, then make them visible.
    ///
    /// Callers serialize batches on one table; the WAL queue is shared.
    pub fn put_batch(&self, records: Vec<LogRecord>, batch_id: u64, options: &WriteOptions) -> Result<()> {
        if !options.disable_wal {
            for record in &records {
                self.wal.pending_writes(record.encode_for_batch(batch_id));
            }
            self.wal.pending_writes(LogRecord::batch_end(batch_id).encode());
            self.wal.write_all()?;

            if options.sync && !self.wal.syncs_every_write() {
                self.wal.sync()?;
            }
        }

        debug!(table = self.id(), batch_id, records = records.len(), "applying batch");
        self.apply(records);
        Ok(())
    }

    fn apply(&self, records: Vec<LogRecord>) {
        let mut index = self.index.write();
        for record in records {
            let entry = if record.is_deleted() {
                MemTableEntry::Tombstone
            } else {
                MemTableEntry::Value(record.value)
            };

            let key_len = record.key.len();
            let added = entry_footprint(key_len, entry.value_len());
            match index.insert(record.key, entry) {
                Some(old) => {
                    let removed = entry_footprint(key_len, old.value_len());
                    if added >= removed {
                        self.footprint.fetch_add(added - removed, Ordering::Relaxed);
                    } else {
                        self.footprint.fetch_sub(removed - added, Ordering::Relaxed);
                    }
                }
                None => {
                    self.footprint.fetch_add(added, Ordering::Relaxed);
                }
            }
        }
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    /// Index footprint reached the size limit
    pub fn is_full(&self) -> bool {
        self.footprint() >= self.options.size_limit
    }

    /// Adding `extra` footprint would pass the size limit
    pub fn would_overflow(&self, extra: u64) -> bool {
        self.footprint().saturating_add(extra) > self.options.size_limit
    }

    /// Approximate bytes held by the index
    pub fn footprint(&self) -> u64 {
        self.footprint.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u32 {
        self.options.id
    }

    pub fn options(&self) -> &MemTableOptions {
        &self.options
    }

    /// Keys in the index, tombstones included
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Snapshot of every entry in key order
    pub fn entries(&self) -> Vec<(Bytes, MemTableEntry)> {
        self.index
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn replay_stats(&self) -> ReplayStats {
        self.replay_stats
    }

    pub fn wal(&self) -> &TinyWal {
        &self.wal
    }

    /// Close the WAL; later calls do nothing
    pub fn close(&self) -> Result<()> {
        self.wal.close()
    }
}

/// Table id of a file named `<digits>.SEG.<digits>`
fn parse_table_id(name: &str) -> Option<u32> {
    let (segment, table) = name.split_once(WAL_EXTENSION_MARKER)?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(segment) || !all_digits(table) {
        return None;
    }
    table.parse().ok()
}
