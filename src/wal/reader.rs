//! WAL Reader
//!
//! Sequential cursor over every segment of a Tiny WAL: sealed segments in
//! ascending id order, then the active one. Used for startup replay only.
//!
//! The reader holds a shared lock on the segment set for its whole life, so
//! no rotation or close can happen underneath it.

use parking_lot::RwLockReadGuard;

use crate::error::{Result, StashError};

use super::chunk::{ChunkPosition, SegmentId};
use super::segment::SegmentReader;
use super::tiny_wal::SegmentSet;

pub struct WalReader<'a> {
    segments: RwLockReadGuard<'a, SegmentSet>,
    /// Sealed ids ascending, active id last
    ids: Vec<SegmentId>,
    current: usize,
    reader: Option<SegmentReader>,
    /// Set once the iterator has yielded an error
    failed: bool,
}

impl<'a> WalReader<'a> {
    pub(crate) fn new(segments: RwLockReadGuard<'a, SegmentSet>) -> Self {
        let mut ids: Vec<SegmentId> = segments.sealed_ids().collect();
        ids.push(segments.active_id());
        let reader = ids.first().map(|&id| SegmentReader::new(id));

        Self {
            segments,
            ids,
            current: 0,
            reader,
            failed: false,
        }
    }

    /// Next payload across all segments, or `None` at the end of the log
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, ChunkPosition)>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            let id = reader.segment_id();
            let segment = self
                .segments
                .segment(id)
                .ok_or(StashError::SegmentNotFound(id))?;

            match reader.next(segment)? {
                Some(entry) => return Ok(Some(entry)),
                None => self.skip_segment(),
            }
        }
    }

    /// Abandon the rest of the current segment and move to the next one
    pub fn skip_segment(&mut self) {
        self.current += 1;
        self.reader = self.ids.get(self.current).map(|&id| SegmentReader::new(id));
    }

    pub fn current_segment_id(&self) -> Option<SegmentId> {
        self.reader.as_ref().map(|r| r.segment_id())
    }

    /// Byte offset of the next payload within the current segment
    pub fn current_offset(&self) -> u64 {
        self.reader.as_ref().map_or(0, |r| r.offset())
    }

    /// Whether the cursor is inside the active (still writable) segment
    pub fn on_active_segment(&self) -> bool {
        self.current_segment_id() == Some(self.segments.active_id())
    }
}

impl Iterator for WalReader<'_> {
    type Item = Result<(Vec<u8>, ChunkPosition)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
