//! Tiny WAL
//!
//! One active segment plus any number of sealed ones, all in one directory
//! as `<10-digit id><extension>`.
//!
//! ## Responsibilities
//! - Buffer pending payloads and flush them with one batched segment write
//! - Rotate to a fresh segment before a flush would overflow the size budget
//! - Apply the sync policy to both write paths
//! - Hand out a merged reader for replay
//!
//! ## Locking
//! `segments` is the broad lock: rotation, flush and close take it
//! exclusively. `pending` is the fine lock producers take to buffer payloads.
//! A flush takes `segments` first and only then drains `pending`, so no
//! rotation can interleave with an in-flight flush.

use std::collections::BTreeMap;
use std::fs;
use std::mem;
use std::path::{is_separator, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::cache::BlockCache;
use crate::config::WalSyncStrategy;
use crate::error::{Result, StashError};

use super::chunk::{ChunkPosition, SegmentId, CHUNK_HEADER_SIZE, MAX_CHUNK_PAYLOAD};
use super::reader::WalReader;
use super::segment::Segment;

/// Id of the first segment in an empty directory
pub const INITIAL_SEGMENT_ID: SegmentId = 1;

/// Worst-case encoded size of a `len`-byte payload: its first header, any
/// padding in front of it, and a header at every block boundary it may cross.
pub fn max_write_size(len: usize) -> u64 {
    let len = len as u64;
    let header = CHUNK_HEADER_SIZE as u64;
    header + len + (len / MAX_CHUNK_PAYLOAD as u64 + 2) * header
}

#[derive(Debug, Clone)]
pub struct WalOptions {
    pub dir: PathBuf,
    /// File name suffix, e.g. `.SEG.1`
    pub extension: String,
    /// Size budget of one segment file
    pub segment_size: u64,
    pub sync_strategy: WalSyncStrategy,
    /// 0 disables the block cache
    pub block_cache_bytes: u64,
}

/// Everything the broad lock protects
pub(crate) struct SegmentSet {
    active: Segment,
    sealed: BTreeMap<SegmentId, Segment>,
    bytes_since_sync: u64,
    closed: bool,
}

impl SegmentSet {
    pub(crate) fn segment(&self, id: SegmentId) -> Option<&Segment> {
        if id == self.active.id() {
            Some(&self.active)
        } else {
            self.sealed.get(&id)
        }
    }

    pub(crate) fn active_id(&self) -> SegmentId {
        self.active.id()
    }

    pub(crate) fn sealed_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.sealed.keys().copied()
    }
}

#[derive(Default)]
struct PendingWrites {
    payloads: Vec<Bytes>,
    /// Sum of `max_write_size` over `payloads`
    size: u64,
}

pub struct TinyWal {
    options: WalOptions,
    segments: RwLock<SegmentSet>,
    pending: Mutex<PendingWrites>,
    cache: Option<Arc<BlockCache>>,
    /// Makes the next `close` fail before touching any segment
    #[cfg(test)]
    fail_next_close: std::sync::atomic::AtomicBool,
}

impl TinyWal {
    /// Open the WAL in `options.dir`, creating segment 1 if there is none
    pub fn open(options: WalOptions) -> Result<Self> {
        validate_extension(&options.extension)?;
        if options.segment_size == 0 {
            return Err(StashError::Config("WAL segment size must be > 0".into()));
        }
        fs::create_dir_all(&options.dir)?;

        let cache = BlockCache::with_bytes(options.block_cache_bytes).map(Arc::new);

        let mut ids = scan_segment_ids(&options.dir, &options.extension)?;
        ids.sort_unstable();
        let active_id = ids.pop().unwrap_or(INITIAL_SEGMENT_ID);

        let mut sealed = BTreeMap::new();
        for id in ids {
            let segment = Segment::open(&options.dir, &options.extension, id, cache.clone())?;
            sealed.insert(id, segment);
        }
        let active = Segment::open(&options.dir, &options.extension, active_id, cache.clone())?;

        info!(
            dir = %options.dir.display(),
            extension = %options.extension,
            segments = sealed.len() + 1,
            active = active_id,
            "opened WAL"
        );

        Ok(Self {
            options,
            segments: RwLock::new(SegmentSet {
                active,
                sealed,
                bytes_since_sync: 0,
                closed: false,
            }),
            pending: Mutex::new(PendingWrites::default()),
            cache,
            #[cfg(test)]
            fail_next_close: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> &WalOptions {
        &self.options
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Queue a payload for the next `write_all`; touches no file
    pub fn pending_writes(&self, data: impl Into<Bytes>) {
        let data = data.into();
        let mut pending = self.pending.lock();
        pending.size += max_write_size(data.len());
        pending.payloads.push(data);
    }

    /// Flush every queued payload with one segment write.
    ///
    /// Returns one position per payload in the order they were queued. The
    /// queue is empty afterwards whether or not the flush succeeded.
    pub fn write_all(&self) -> Result<Vec<ChunkPosition>> {
        let mut segments = self.segments.write();
        let pending = mem::take(&mut *self.pending.lock());

        if segments.closed {
            return Err(StashError::SegmentClosed(segments.active.id()));
        }
        if pending.payloads.is_empty() {
            return Ok(Vec::new());
        }
        if pending.size > self.options.segment_size {
            return Err(StashError::PendingSizeTooLarge {
                size: pending.size,
                max: self.options.segment_size,
            });
        }

        if segments.active.size() + pending.size > self.options.segment_size {
            self.rotate(&mut segments)?;
        }

        let positions = segments.active.write_all(&pending.payloads)?;
        segments.bytes_since_sync += positions.iter().map(|p| p.chunk_size as u64).sum::<u64>();
        self.maybe_sync(&mut segments)?;

        Ok(positions)
    }

    /// Write one payload directly, bypassing the queue
    pub fn write(&self, data: &[u8]) -> Result<ChunkPosition> {
        let size = max_write_size(data.len());
        if size > self.options.segment_size {
            return Err(StashError::DataTooLarge {
                size,
                max: self.options.segment_size,
            });
        }

        let mut segments = self.segments.write();
        if segments.closed {
            return Err(StashError::SegmentClosed(segments.active.id()));
        }

        if segments.active.size() + size > self.options.segment_size {
            self.rotate(&mut segments)?;
        }

        let position = segments.active.write(data)?;
        segments.bytes_since_sync += position.chunk_size as u64;
        self.maybe_sync(&mut segments)?;

        Ok(position)
    }

    /// Seal the active segment and start `id + 1`
    fn rotate(&self, segments: &mut SegmentSet) -> Result<()> {
        segments.active.sync()?;
        segments.bytes_since_sync = 0;

        let next_id = segments.active.id() + 1;
        let next = Segment::open(
            &self.options.dir,
            &self.options.extension,
            next_id,
            self.cache.clone(),
        )?;
        let old = mem::replace(&mut segments.active, next);

        info!(
            extension = %self.options.extension,
            sealed = old.id(),
            active = next_id,
            sealed_size = old.size(),
            "rotated WAL segment"
        );
        segments.sealed.insert(old.id(), old);
        Ok(())
    }

    fn maybe_sync(&self, segments: &mut SegmentSet) -> Result<()> {
        let due = match self.options.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNBytes { bytes } => segments.bytes_since_sync >= bytes,
            WalSyncStrategy::Manual => false,
        };
        if due {
            segments.active.sync()?;
            segments.bytes_since_sync = 0;
        }
        Ok(())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Merged cursor over sealed segments then the active one.
    ///
    /// Holds the segment set's shared lock until dropped; writes block
    /// meanwhile.
    pub fn new_reader(&self) -> Result<WalReader<'_>> {
        let segments = self.segments.read();
        if segments.closed {
            return Err(StashError::SegmentClosed(segments.active.id()));
        }
        Ok(WalReader::new(segments))
    }

    /// Read the payload at `position`
    pub fn read(&self, position: &ChunkPosition) -> Result<Vec<u8>> {
        let segments = self.segments.read();
        segments
            .segment(position.segment_id)
            .ok_or(StashError::SegmentNotFound(position.segment_id))?
            .read_at(position)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// fsync the active segment
    pub fn sync(&self) -> Result<()> {
        let mut segments = self.segments.write();
        segments.active.sync()?;
        segments.bytes_since_sync = 0;
        Ok(())
    }

    /// Cut the active segment back to `size` bytes
    pub fn truncate_active(&self, size: u64) -> Result<()> {
        let mut segments = self.segments.write();
        debug!(segment = segments.active.id(), size, "truncating active segment");
        segments.active.truncate(size)
    }

    /// Close every segment; later calls do nothing
    pub fn close(&self) -> Result<()> {
        let mut segments = self.segments.write();
        if segments.closed {
            return Ok(());
        }
        #[cfg(test)]
        self.take_close_failure()?;

        if let Some(cache) = &self.cache {
            cache.purge();
        }
        for segment in segments.sealed.values_mut() {
            segment.close()?;
        }
        segments.active.sync()?;
        segments.active.close()?;
        segments.closed = true;
        self.clear_pending();

        debug!(extension = %self.options.extension, "closed WAL");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn active_segment_id(&self) -> SegmentId {
        self.segments.read().active.id()
    }

    /// Logical size of the active segment
    pub fn active_size(&self) -> u64 {
        self.segments.read().active.size()
    }

    /// Sealed segments plus the active one
    pub fn segment_count(&self) -> usize {
        self.segments.read().sealed.len() + 1
    }

    /// True when no segment holds any data
    pub fn is_empty(&self) -> bool {
        let segments = self.segments.read();
        segments.active.size() == 0 && segments.sealed.values().all(|s| s.size() == 0)
    }

    pub fn is_closed(&self) -> bool {
        self.segments.read().closed
    }

    /// Number of queued payloads
    pub fn pending_len(&self) -> usize {
        self.pending.lock().payloads.len()
    }

    pub fn clear_pending(&self) {
        *self.pending.lock() = PendingWrites::default();
    }

    /// Bytes appended since the last fsync of the active segment
    #[cfg(test)]
    pub(crate) fn bytes_since_sync(&self) -> u64 {
        self.segments.read().bytes_since_sync
    }

    #[cfg(test)]
    pub(crate) fn fail_next_close(&self) {
        self.fail_next_close.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_close_failure(&self) -> Result<()> {
        if self.fail_next_close.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected close failure").into());
        }
        Ok(())
    }

    /// Whether every write is already followed by an fsync
    pub fn syncs_every_write(&self) -> bool {
        self.options.sync_strategy == WalSyncStrategy::EveryWrite
    }
}

fn validate_extension(ext: &str) -> Result<()> {
    if ext.is_empty() || ext.chars().any(is_separator) {
        return Err(StashError::InvalidSegmentExtension(ext.to_string()));
    }
    Ok(())
}

/// Ids of files named `<digits><ext>` in `dir`
fn scan_segment_ids(dir: &Path, ext: &str) -> Result<Vec<SegmentId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(ext)) else {
            continue;
        };
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(id) = stem.parse::<SegmentId>() {
            ids.push(id);
        }
    }
    Ok(ids)
}
