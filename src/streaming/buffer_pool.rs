//! Pooled output buffers.
//!
//! `acquire` hands back an empty, pre-capacitated buffer; only the
//! producer writes into it before it is enqueued, and only the
//! consumer (the HTTP-writer side, `streaming::engine`'s
//! `PooledChunkStream`) releases it back to the pool once it reclaims
//! sole ownership of the chunk after the previous write. That
//! ownership transfer is what lets the pool stay a plain
//! `Mutex<Vec<BytesMut>>` instead of anything fancier — there is never
//! a moment both sides hold a live reference.
//!
//! [`BUFFER_POOL`] is process-wide: every in-flight request's producer
//! and writer share the one free list, so a burst of concurrent
//! requests reuses allocations across requests rather than each
//! maintaining its own private (and therefore never-reused) pool.

use std::sync::Mutex;

use bytes::BytesMut;
use once_cell::sync::Lazy;

use crate::constants::BUFFER_POOL_INITIAL_CAPACITY;

/// The single pool shared by every request this process serves.
pub static BUFFER_POOL: Lazy<BufferPool> = Lazy::new(BufferPool::new);

pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Returns a reused buffer if one is free, otherwise allocates a
    /// fresh one at the pool's initial capacity.
    pub fn acquire(&self) -> BytesMut {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        free.pop()
            .unwrap_or_else(|| BytesMut::with_capacity(BUFFER_POOL_INITIAL_CAPACITY))
    }

    /// Returns a buffer to the pool, clearing it but keeping its
    /// allocation.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        free.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
