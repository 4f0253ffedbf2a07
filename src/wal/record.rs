//! Log record codec
//!
//! The WAL payload before chunking:
//!
//! ```text
//! ┌──────────┬────────────────┬──────────────┬──────────────┬─────┬───────┐
//! │ Type (1) │ batchId uvarint│ keyLen uvarint│ valLen uvarint│ Key │ Value │
//! └──────────┴────────────────┴──────────────┴──────────────┴─────┴───────┘
//! ```
//!
//! All varints are unsigned LEB128 (at most 10 bytes each).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, StashError};

/// Longest unsigned LEB128 encoding of a u64
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    Normal = 0,
    Deleted = 1,
    /// Closes a batch; key is the batch id in big-endian
    BatchEnd = 2,
}

impl LogRecordType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(LogRecordType::Normal),
            1 => Some(LogRecordType::Deleted),
            2 => Some(LogRecordType::BatchEnd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub record_type: LogRecordType,
    pub batch_id: u64,
    pub key: Bytes,
    pub value: Bytes,
}

impl LogRecord {
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            record_type: LogRecordType::Normal,
            batch_id: 0,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Bytes>) -> Self {
        Self {
            record_type: LogRecordType::Deleted,
            batch_id: 0,
            key: key.into(),
            value: Bytes::new(),
        }
    }

    /// Sentinel that makes batch `batch_id` visible on replay
    pub fn batch_end(batch_id: u64) -> Self {
        Self {
            record_type: LogRecordType::BatchEnd,
            batch_id,
            key: Bytes::copy_from_slice(&batch_id.to_be_bytes()),
            value: Bytes::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.record_type == LogRecordType::Deleted
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded_len_with(self.batch_id)
    }

    fn encoded_len_with(&self, batch_id: u64) -> usize {
        1 + uvarint_len(batch_id)
            + uvarint_len(self.key.len() as u64)
            + uvarint_len(self.value.len() as u64)
            + self.key.len()
            + self.value.len()
    }

    pub fn encode(&self) -> Bytes {
        self.encode_with(self.batch_id)
    }

    /// Encode stamped with `batch_id` instead of the record's own id
    pub fn encode_for_batch(&self, batch_id: u64) -> Bytes {
        self.encode_with(batch_id)
    }

    fn encode_with(&self, batch_id: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len_with(batch_id));
        buf.put_u8(self.record_type as u8);
        put_uvarint(&mut buf, batch_id);
        put_uvarint(&mut buf, self.key.len() as u64);
        put_uvarint(&mut buf, self.value.len() as u64);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        buf.freeze()
    }

    /// Decode a whole payload; trailing bytes are rejected
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&type_byte, mut rest) = data
            .split_first()
            .ok_or_else(|| invalid("empty payload"))?;
        let record_type = LogRecordType::from_byte(type_byte)
            .ok_or_else(|| invalid(format!("unknown record type {}", type_byte)))?;

        let batch_id = take_uvarint(&mut rest, "batch id")?;
        let key_len = take_uvarint(&mut rest, "key length")?;
        let value_len = take_uvarint(&mut rest, "value length")?;

        if key_len.checked_add(value_len) != Some(rest.len() as u64) {
            return Err(invalid(format!(
                "lengths {} + {} do not match {} body bytes",
                key_len,
                value_len,
                rest.len()
            )));
        }

        let (key, value) = rest.split_at(key_len as usize);
        Ok(Self {
            record_type,
            batch_id,
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        })
    }
}

fn invalid(msg: impl Into<String>) -> StashError {
    StashError::InvalidLogRecord(msg.into())
}

pub fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Decode one uvarint; returns (value, bytes consumed)
pub fn get_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        // The tenth byte may only carry the top bit of a u64
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            return Some((value, i + 1));
        }
    }
    None
}

fn take_uvarint(rest: &mut &[u8], what: &str) -> Result<u64> {
    let (value, n) = get_uvarint(rest).ok_or_else(|| invalid(format!("bad {} varint", what)))?;
    *rest = &rest[n..];
    Ok(value)
}

fn uvarint_len(mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}
