//! Chunk codec
//!
//! Stateless encode/decode of one block-framed chunk. A chunk never crosses a
//! block boundary; payloads larger than the room left in a block are split
//! into a Start, zero or more Middle and one End chunk.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, StashError};

/// Size of one block in a segment file (32 KiB)
pub const BLOCK_SIZE: u32 = 32 * 1024;

/// Chunk header: CRC (4) + Length (2) + Type (1) = 7 bytes
pub const CHUNK_HEADER_SIZE: u32 = 7;

/// Largest payload a single chunk can carry
pub const MAX_CHUNK_PAYLOAD: u32 = BLOCK_SIZE - CHUNK_HEADER_SIZE;

/// Identifier of a segment file; ids only ever grow
pub type SegmentId = u32;

/// Kind of chunk, stored in header byte 6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// The whole payload
    Full = 0,
    /// First piece of a split payload
    Start = 1,
    /// Interior piece of a split payload
    Middle = 2,
    /// Last piece of a split payload
    End = 3,
}

impl ChunkType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ChunkType::Full),
            1 => Some(ChunkType::Start),
            2 => Some(ChunkType::Middle),
            3 => Some(ChunkType::End),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether this chunk completes a payload
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkType::Full | ChunkType::End)
    }

    /// Whether this chunk may open a payload
    pub fn is_initial(self) -> bool {
        matches!(self, ChunkType::Full | ChunkType::Start)
    }
}

/// Address of a payload's first chunk plus the total bytes it consumed
/// (headers, payload, and any block padding written in front of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkPosition {
    pub segment_id: SegmentId,
    pub block_index: u32,
    pub chunk_offset: u32,
    pub chunk_size: u32,
}

impl ChunkPosition {
    /// Absolute byte offset of the first chunk within its segment
    pub fn file_offset(&self) -> u64 {
        self.block_index as u64 * BLOCK_SIZE as u64 + self.chunk_offset as u64
    }
}

/// Decoded 7-byte chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub checksum: u32,
    pub length: u16,
    pub chunk_type: u8,
}

impl ChunkHeader {
    /// Decode from the first `CHUNK_HEADER_SIZE` bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHUNK_HEADER_SIZE as usize {
            return Err(StashError::InvalidLogRecord(format!(
                "chunk header needs {} bytes, got {}",
                CHUNK_HEADER_SIZE,
                bytes.len()
            )));
        }
        Ok(Self {
            checksum: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            length: u16::from_le_bytes([bytes[4], bytes[5]]),
            chunk_type: bytes[6],
        })
    }
}

/// CRC32 (IEEE) over header bytes [4..7] followed by the payload
pub fn checksum(length_and_type: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(length_and_type);
    hasher.update(payload);
    hasher.finalize()
}

/// Append one framed chunk to `buf`.
///
/// `payload` must fit in a single chunk (at most `MAX_CHUNK_PAYLOAD` bytes).
pub fn encode_chunk(buf: &mut BytesMut, payload: &[u8], chunk_type: ChunkType) {
    debug_assert!(payload.len() <= MAX_CHUNK_PAYLOAD as usize);

    let mut length_and_type = [0u8; 3];
    length_and_type[..2].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    length_and_type[2] = chunk_type.to_byte();

    buf.reserve(CHUNK_HEADER_SIZE as usize + payload.len());
    buf.put_u32_le(checksum(&length_and_type, payload));
    buf.put_slice(&length_and_type);
    buf.put_slice(payload);
}
