// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Shared buffer pool for the inference runtime. Every activation buffer the
//! runtime touches comes from here, in one of two kinds:
//!
//! - **hardware** buffers live in physically contiguous, device-visible
//!   memory supplied by a [`DeviceAllocator`] and expose a physical address
//!   the accelerator can DMA to and from;
//! - **local** buffers are ordinary host memory used for staging
//!   (concatenation, split and merge scratch).
//!
//! # Key Components
//!
//! - [`BufferPool`] reserves buffers up front, grows lazily up to a cap and
//!   blocks acquirers (with a timeout) once the cap is reached.
//! - [`PooledBuffer`] is the RAII handle: dropping it returns the buffer to
//!   its free list and wakes any waiter.
//! - [`Buffer`] carries a claim flag (an in-use lock that outlives a single
//!   call) and a [`Rendezvous`] counter used to wait for N outstanding
//!   writers.
//! - [`PoolStats`] records acquisitions, timeouts and peak usage.
//!
//! # Ownership Model
//!
//! ```text
//! BufferPool::acquire(kind)
//!       │
//!       ▼
//!   PooledBuffer ◄─── holds Arc<Buffer> and Arc<PoolInner>
//!       │
//!       │  shared() ──► Arc<Buffer> moved into worker jobs
//!       │
//!       │  drop()
//!       ▼
//!   PoolInner::release() ──► free list, notify waiters
//! ```
//!
//! Buffers themselves are never freed while the pool lives; storage is
//! dropped when the last `Arc` goes away.

mod buffer;
mod error;
mod guard;
pub mod pool;
mod rendezvous;
mod stats;

pub use buffer::{
    lock_pair, Buffer, BufferKind, BufferStorage, DeviceAllocator, DeviceMemory, HostAllocator,
    HostMemory,
};
pub use error::MemoryError;
pub use guard::PooledBuffer;
pub use pool::{BufferPool, PoolConfig};
pub use rendezvous::Rendezvous;
pub use stats::PoolStats;
