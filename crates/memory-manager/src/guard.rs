// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII handle that returns a buffer to the pool on drop.
//!
//! [`PooledBuffer`] is how call sites borrow a pool buffer for one pipeline
//! stage. Dropping the handle resets the buffer's rendezvous and pushes the
//! buffer back onto its kind's free list, waking blocked acquirers. Release
//! is therefore tied to ownership: a job that captures the handle releases
//! the buffer when the job finishes.

use crate::pool::PoolInner;
use crate::Buffer;
use std::ops::Deref;
use std::sync::Arc;

/// An acquired pool buffer.
///
/// Dereferences to [`Buffer`]. Use [`shared`](PooledBuffer::shared) to hand a
/// non-owning reference (for example to a dispatcher that must unclaim the
/// buffer on sync) without affecting when it returns to the pool.
pub struct PooledBuffer {
    buffer: Arc<Buffer>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    pub(crate) fn new(buffer: Arc<Buffer>, pool: Arc<PoolInner>) -> Self {
        Self { buffer, pool }
    }

    /// A shared reference to the underlying buffer.
    pub fn shared(&self) -> Arc<Buffer> {
        Arc::clone(&self.buffer)
    }
}

impl Deref for PooledBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(Arc::clone(&self.buffer));
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("id", &self.buffer.id())
            .field("kind", &self.buffer.kind())
            .field("size", &self.buffer.size())
            .finish()
    }
}
