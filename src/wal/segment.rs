//! Segment File
//!
//! One append-only file of fixed 32 KiB blocks. Payloads become chunk
//! sequences on write; positions resolve back to payloads on read.
//!
//! The in-memory block cursor (`last_block_index`, `last_block_size`) is the
//! logical end of the segment. Writes go to that offset, so bytes left behind
//! by a failed write are overwritten by the next one and never read.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::cache::BlockCache;
use crate::error::{Result, StashError};
use crate::pool;

use super::chunk::{
    checksum, encode_chunk, ChunkHeader, ChunkPosition, ChunkType, SegmentId, BLOCK_SIZE,
    CHUNK_HEADER_SIZE,
};

/// `<dir>/<10-digit id><ext>`
pub fn segment_file_name(dir: &Path, ext: &str, id: SegmentId) -> PathBuf {
    dir.join(format!("{:010}{}", id, ext))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockCursor {
    index: u32,
    size: u32,
}

impl BlockCursor {
    fn offset(&self) -> u64 {
        self.index as u64 * BLOCK_SIZE as u64 + self.size as u64
    }
}

/// One decoded payload
struct ChunkRead {
    payload: Vec<u8>,
    /// Where the next payload starts
    next: ChunkPosition,
    /// Byte offset just past this payload's last chunk
    end: u64,
}

/// An append-only segment file
pub struct Segment {
    id: SegmentId,
    path: PathBuf,
    /// None once closed
    file: Option<File>,
    last_block_index: u32,
    last_block_size: u32,
    cache: Option<Arc<BlockCache>>,
}

impl Segment {
    /// Open or create the segment file `id` in `dir`
    pub fn open(
        dir: &Path,
        ext: &str,
        id: SegmentId,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        let path = segment_file_name(dir, ext, id);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let size = file.metadata()?.len();
        debug!(segment = id, size, path = %path.display(), "opened segment");

        Ok(Self {
            id,
            path,
            file: Some(file),
            last_block_index: (size / BLOCK_SIZE as u64) as u32,
            last_block_size: (size % BLOCK_SIZE as u64) as u32,
            cache,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Logical size: lastBlockIndex × BlockSize + lastBlockSize
    pub fn size(&self) -> u64 {
        self.cursor().offset()
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Write one payload; returns the position of its first chunk
    pub fn write(&mut self, data: &[u8]) -> Result<ChunkPosition> {
        self.ensure_open()?;
        let saved = self.cursor();
        let mut buf = pool::encode_buffer();

        let result = self
            .write_to_buffer(data, &mut buf)
            .and_then(|position| self.write_chunk_buffer(&buf, saved).map(|_| position));

        if result.is_err() {
            self.restore(saved);
        }
        result
    }

    /// Write several payloads with one buffered encode and one file write.
    ///
    /// On failure the block cursor rolls back to where it was before the call.
    pub fn write_all<T: AsRef<[u8]>>(&mut self, payloads: &[T]) -> Result<Vec<ChunkPosition>> {
        self.ensure_open()?;
        let saved = self.cursor();
        let mut buf = pool::encode_buffer();

        let result = self.encode_all(payloads, &mut buf).and_then(|positions| {
            self.write_chunk_buffer(&buf, saved)?;
            Ok(positions)
        });

        if result.is_err() {
            self.restore(saved);
        }
        result
    }

    fn encode_all<T: AsRef<[u8]>>(
        &mut self,
        payloads: &[T],
        buf: &mut BytesMut,
    ) -> Result<Vec<ChunkPosition>> {
        let mut positions = Vec::with_capacity(payloads.len());
        for payload in payloads {
            positions.push(self.write_to_buffer(payload.as_ref(), buf)?);
        }
        Ok(positions)
    }

    /// Encode `data` into `buf` as chunks and advance the block cursor.
    fn write_to_buffer(&mut self, data: &[u8], buf: &mut BytesMut) -> Result<ChunkPosition> {
        if data.len() > u32::MAX as usize / 2 {
            return Err(StashError::DataTooLarge {
                size: data.len() as u64,
                max: u32::MAX as u64 / 2,
            });
        }

        let start_len = buf.len();
        let mut padding = 0u32;

        // Not even a header fits: zero the rest of the block
        if BLOCK_SIZE - self.last_block_size < CHUNK_HEADER_SIZE {
            padding = BLOCK_SIZE - self.last_block_size;
            buf.put_bytes(0, padding as usize);
            self.last_block_index += 1;
            self.last_block_size = 0;
        }

        let mut position = ChunkPosition {
            segment_id: self.id,
            block_index: self.last_block_index,
            chunk_offset: self.last_block_size,
            chunk_size: 0,
        };

        let data_size = data.len() as u32;
        let span = if self.last_block_size + CHUNK_HEADER_SIZE + data_size <= BLOCK_SIZE {
            encode_chunk(buf, data, ChunkType::Full);
            CHUNK_HEADER_SIZE + data_size
        } else {
            let mut written = 0u32;
            let mut chunk_count = 0u32;
            let mut block_size = self.last_block_size;

            while written < data_size {
                let room = BLOCK_SIZE - block_size - CHUNK_HEADER_SIZE;
                let left = data_size - written;
                let chunk_len = room.min(left);

                let chunk_type = if chunk_count == 0 {
                    ChunkType::Start
                } else if chunk_len == left {
                    ChunkType::End
                } else {
                    ChunkType::Middle
                };

                let from = written as usize;
                encode_chunk(buf, &data[from..from + chunk_len as usize], chunk_type);

                written += chunk_len;
                chunk_count += 1;
                block_size = (block_size + chunk_len + CHUNK_HEADER_SIZE) % BLOCK_SIZE;
            }

            chunk_count * CHUNK_HEADER_SIZE + data_size
        };

        position.chunk_size = span + padding;
        debug_assert_eq!((buf.len() - start_len) as u32, position.chunk_size);

        self.last_block_size += span;
        if self.last_block_size >= BLOCK_SIZE {
            self.last_block_index += self.last_block_size / BLOCK_SIZE;
            self.last_block_size %= BLOCK_SIZE;
        }

        Ok(position)
    }

    /// Write an encoded buffer at the logical end that preceded it
    fn write_chunk_buffer(&mut self, buf: &[u8], saved: BlockCursor) -> Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Err(StashError::SegmentClosed(self.id));
        };

        if let Err(e) = write_all_at(file, buf, saved.offset()) {
            warn!(
                segment = self.id,
                offset = saved.offset(),
                len = buf.len(),
                error = %e,
                "segment write failed, rolling back block cursor"
            );
            // Best effort: the next write overwrites the torn bytes anyway
            if let Err(trunc) = file.set_len(saved.offset()) {
                warn!(segment = self.id, error = %trunc, "could not drop torn tail");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn cursor(&self) -> BlockCursor {
        BlockCursor {
            index: self.last_block_index,
            size: self.last_block_size,
        }
    }

    fn restore(&mut self, cursor: BlockCursor) {
        self.last_block_index = cursor.index;
        self.last_block_size = cursor.size;
    }

    /// Cut the segment back to `size` bytes (drops a torn tail found by replay)
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Err(StashError::SegmentClosed(self.id));
        };
        file.set_len(size)?;
        file.sync_all()?;

        self.last_block_index = (size / BLOCK_SIZE as u64) as u32;
        self.last_block_size = (size % BLOCK_SIZE as u64) as u32;
        if let Some(cache) = &self.cache {
            cache.remove_segment(self.id);
        }
        Ok(())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read the payload starting at (`block_index`, `chunk_offset`).
    ///
    /// Returns the payload and the position where the next payload starts.
    /// A position at or past the end of the segment is a truncation error.
    pub fn read(&self, block_index: u32, chunk_offset: u32) -> Result<(Vec<u8>, ChunkPosition)> {
        self.read_internal(block_index, chunk_offset)?
            .map(|read| (read.payload, read.next))
            .ok_or(StashError::TruncatedChunk {
                segment: self.id,
                block: block_index,
                offset: chunk_offset,
            })
    }

    /// Read the payload at `position`
    pub fn read_at(&self, position: &ChunkPosition) -> Result<Vec<u8>> {
        self.read(position.block_index, position.chunk_offset)
            .map(|(data, _)| data)
    }

    /// Like `read`, but `Ok(None)` when the position is exactly the clean end
    /// of the segment.
    fn read_internal(&self, mut block_index: u32, mut chunk_offset: u32) -> Result<Option<ChunkRead>> {
        self.ensure_open()?;

        let segment_size = self.size();
        let mut payload = Vec::new();
        let mut first = true;

        loop {
            let block_start = block_index as u64 * BLOCK_SIZE as u64;
            let size = segment_size
                .saturating_sub(block_start)
                .min(BLOCK_SIZE as u64) as u32;

            if chunk_offset >= size {
                if first {
                    return Ok(None);
                }
                return Err(self.truncated(block_index, chunk_offset));
            }
            if chunk_offset + CHUNK_HEADER_SIZE > size {
                return Err(self.truncated(block_index, chunk_offset));
            }

            let block = self.load_block(block_index, size)?;
            let header_at = chunk_offset as usize;
            let header = ChunkHeader::decode(&block[header_at..])?;

            let start = header_at + CHUNK_HEADER_SIZE as usize;
            let end = start + header.length as usize;
            if end > size as usize {
                return Err(self.truncated(block_index, chunk_offset));
            }

            let actual = checksum(&block[header_at + 4..start], &block[start..end]);
            if actual != header.checksum {
                return Err(StashError::ChecksumMismatch {
                    segment: self.id,
                    block: block_index,
                    offset: chunk_offset,
                    expected: header.checksum,
                    actual,
                });
            }

            let chunk_type = ChunkType::from_byte(header.chunk_type)
                .ok_or(StashError::InvalidChunkType(header.chunk_type))?;
            if chunk_type.is_initial() != first {
                return Err(StashError::InvalidChunkType(header.chunk_type));
            }

            payload.extend_from_slice(&block[start..end]);

            if chunk_type.is_terminal() {
                let end = end as u32;
                let (next_block, next_offset) = if end + CHUNK_HEADER_SIZE > BLOCK_SIZE {
                    (block_index + 1, 0)
                } else {
                    (block_index, end)
                };
                return Ok(Some(ChunkRead {
                    payload,
                    next: ChunkPosition {
                        segment_id: self.id,
                        block_index: next_block,
                        chunk_offset: next_offset,
                        chunk_size: 0,
                    },
                    end: block_start + end as u64,
                }));
            }

            // Start/Middle chunks always fill their block
            block_index += 1;
            chunk_offset = 0;
            first = false;
        }
    }

    /// Bytes [0, size) of a block; complete blocks go through the cache
    fn load_block(&self, block_index: u32, size: u32) -> Result<Bytes> {
        let cacheable = size == BLOCK_SIZE;
        let key = (self.id, block_index);

        if cacheable {
            if let Some(block) = self.cache.as_ref().and_then(|c| c.get(&key)) {
                return Ok(block);
            }
        }

        let Some(file) = self.file.as_ref() else {
            return Err(StashError::SegmentClosed(self.id));
        };
        let mut block = vec![0u8; size as usize];
        match read_exact_at(file, &mut block, block_index as u64 * BLOCK_SIZE as u64) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(self.truncated(block_index, 0));
            }
            Err(e) => return Err(e.into()),
        }

        let block = Bytes::from(block);
        if cacheable {
            if let Some(cache) = &self.cache {
                cache.insert(key, block.clone());
            }
        }
        Ok(block)
    }

    fn truncated(&self, block: u32, offset: u32) -> StashError {
        StashError::TruncatedChunk {
            segment: self.id,
            block,
            offset,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// fsync; no-op once closed
    pub fn sync(&self) -> Result<()> {
        match &self.file {
            Some(file) => Ok(file.sync_all()?),
            None => Ok(()),
        }
    }

    /// Release the file handle; later calls do nothing
    pub fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            debug!(segment = self.id, "closed segment");
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StashError::SegmentClosed(self.id));
        }
        Ok(())
    }
}

/// Sequential cursor over the payloads of one segment
#[derive(Debug, Clone)]
pub struct SegmentReader {
    segment_id: SegmentId,
    block_index: u32,
    chunk_offset: u32,
    /// Block padding skipped after the previous payload; it belongs to the
    /// next payload's `chunk_size`, as on the write side.
    carried_padding: u32,
}

impl SegmentReader {
    pub fn new(segment_id: SegmentId) -> Self {
        Self {
            segment_id,
            block_index: 0,
            chunk_offset: 0,
            carried_padding: 0,
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Byte offset of the next payload
    pub fn offset(&self) -> u64 {
        self.block_index as u64 * BLOCK_SIZE as u64 + self.chunk_offset as u64
    }

    /// Next payload and its position, or `None` at the clean end of `segment`
    pub fn next(&mut self, segment: &Segment) -> Result<Option<(Vec<u8>, ChunkPosition)>> {
        let Some(read) = segment.read_internal(self.block_index, self.chunk_offset)? else {
            return Ok(None);
        };

        let start = self.offset();
        let position = ChunkPosition {
            segment_id: self.segment_id,
            block_index: self.block_index,
            chunk_offset: self.chunk_offset,
            chunk_size: self.carried_padding + (read.end - start) as u32,
        };

        self.carried_padding = (read.next.file_offset() - read.end) as u32;
        self.block_index = read.next.block_index;
        self.chunk_offset = read.next.chunk_offset;
        Ok(Some((read.payload, position)))
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
