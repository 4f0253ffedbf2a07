//! Write-Ahead Log (WAL) Module
//!
//! Durability for one memtable generation: every batch is framed, checksummed
//! and flushed here before it touches the in-memory index.
//!
//! ## Responsibilities
//! - Frame payloads into CRC32-checked chunks inside fixed 32 KiB blocks
//! - Append to the active segment, rotating when it would overflow its budget
//! - Replay every segment in id order on startup
//!
//! ## File Format
//! ```text
//! ┌──────────────────────── Block 0 (32 KiB) ────────────────────────┐
//! │ ┌─────────┬─────────┬──────────┬─────────┐ ┌─────────┬───┐       │
//! │ │ CRC (4) │ Len (2) │ Type (1) │ Payload │ │ Header  │...│ 0-pad │
//! │ └─────────┴─────────┴──────────┴─────────┘ └─────────┴───┘       │
//! ├──────────────────────── Block 1 (32 KiB) ────────────────────────┤
//! │ ...                                                              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//! CRC32 (IEEE, little-endian) covers Len, Type and Payload. A payload too
//! large for the rest of its block is split into Start, Middle and End
//! chunks. A block tail shorter than one header is zero-padded.

mod chunk;
mod reader;
mod record;
mod segment;
mod tiny_wal;

pub use chunk::{
    ChunkHeader, ChunkPosition, ChunkType, SegmentId, BLOCK_SIZE, CHUNK_HEADER_SIZE,
    MAX_CHUNK_PAYLOAD,
};
pub use reader::WalReader;
pub use record::{LogRecord, LogRecordType};
pub use segment::{segment_file_name, Segment, SegmentReader};
pub use tiny_wal::{max_write_size, TinyWal, WalOptions, INITIAL_SEGMENT_ID};
