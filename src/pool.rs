//! Object pools
//!
//! Segment writes encode whole batches into one buffer before a single file
//! write. Buffers come from a lock-free pool and go back to it when the
//! guard drops, so every exit path (including `?`) returns them.
//!
//! Batches are pooled too, but explicitly: [`BatchPool::put`] resets a batch
//! before it becomes available again.

use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

use crate::batch::Batch;
use crate::wal::BLOCK_SIZE;

/// Buffers kept around between writes
const POOL_CAPACITY: usize = 16;

/// Buffers that grew past this are dropped instead of pooled
const MAX_RETAINED_CAPACITY: usize = 64 * BLOCK_SIZE as usize;

/// Lock-free pool of `BytesMut` buffers
pub struct BufferPool {
    buffers: ArrayQueue<BytesMut>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Take a cleared buffer; it returns to the pool when the guard drops
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self
            .buffers
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(BLOCK_SIZE as usize));
        PooledBuffer { pool: self, buf }
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.buffers.len()
    }

    fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        // Full pool: let the buffer drop
        let _ = self.buffers.push(buf);
    }
}

/// Scoped handle to a pooled buffer
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: BytesMut,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

/// Process-wide pool used by segment writes
pub fn encode_buffer() -> PooledBuffer<'static> {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(|| BufferPool::new(POOL_CAPACITY)).get()
}

/// Lock-free pool of reusable batches
pub struct BatchPool {
    batches: ArrayQueue<Batch>,
}

impl BatchPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            batches: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// A pooled batch, or a new one when the pool is empty
    pub fn get(&self) -> Batch {
        self.batches.pop().unwrap_or_default()
    }

    /// Reset `batch` and keep it for reuse; dropped if the pool is full
    pub fn put(&self, mut batch: Batch) {
        batch.reset();
        let _ = self.batches.push(batch);
    }

    /// Number of idle batches
    pub fn idle(&self) -> usize {
        self.batches.len()
    }
}
