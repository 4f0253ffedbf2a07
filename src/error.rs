//! Error types for SmartStash
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StashError
pub type Result<T> = std::result::Result<T, StashError>;

/// Unified error type for SmartStash operations
#[derive(Debug, Error)]
pub enum StashError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("The key is empty")]
    KeyEmpty,

    // -------------------------------------------------------------------------
    // State Errors
    // -------------------------------------------------------------------------
    #[error("The database is closed")]
    DbClosed,

    #[error("The database directory is used by another process")]
    DatabaseInUse,

    #[error("Write attempted on a read-only batch")]
    ReadOnlyBatch,

    #[error("The batch is already committed")]
    BatchCommitted,

    #[error("The batch is not bound to a database")]
    BatchNotActive,

    #[error("Segment file {0} is closed")]
    SegmentClosed(u32),

    #[error("Segment file {0} does not exist")]
    SegmentNotFound(u32),

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Pending writes too large: {size} bytes (segment budget {max})")]
    PendingSizeTooLarge { size: u64, max: u64 },

    #[error("Data too large: {size} bytes (segment budget {max})")]
    DataTooLarge { size: u64, max: u64 },

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error(
        "Checksum mismatch in segment {segment} at block {block} offset {offset}: \
         stored {expected:#010x}, computed {actual:#010x}"
    )]
    ChecksumMismatch {
        segment: u32,
        block: u32,
        offset: u32,
        expected: u32,
        actual: u32,
    },

    #[error("Truncated chunk in segment {segment} at block {block} offset {offset}")]
    TruncatedChunk { segment: u32, block: u32, offset: u32 },

    #[error("Invalid chunk type {0}")]
    InvalidChunkType(u8),

    #[error("Invalid log record: {0}")]
    InvalidLogRecord(String),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Invalid segment file extension: {0}")]
    InvalidSegmentExtension(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StashError {
    /// True for checksum/truncation failures: corruption, or the torn tail
    /// that marks the true end of a log.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            StashError::ChecksumMismatch { .. }
                | StashError::TruncatedChunk { .. }
                | StashError::InvalidChunkType(_)
                | StashError::InvalidLogRecord(_)
        )
    }
}

impl From<bincode::Error> for StashError {
    fn from(err: bincode::Error) -> Self {
        StashError::Serialization(err.to_string())
    }
}
