// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Buffer pool with bounded-wait acquisition.
//!
//! The [`BufferPool`] owns every buffer the runtime uses. It:
//!
//! 1. Reserves buffers eagerly at start-up ([`BufferPool::reserve`]), so a
//!    memory shortfall surfaces before any work is done.
//! 2. Hands buffers out from per-kind free lists, growing the pool lazily
//!    (up to a per-kind cap) when a list runs dry.
//! 3. Blocks acquirers when the cap is reached, failing with
//!    [`MemoryError::AcquireTimeout`] if nothing is released in time.
//!
//! All buffers share one size. They are never freed individually: a
//! released buffer goes back on its free list and its storage is dropped
//! only when the pool (and every outstanding handle) is gone.
//!
//! # Thread Safety
//! `BufferPool` is `Send + Sync`. Free lists are protected by a single
//! mutex; one condition variable signals releases.

use crate::buffer::try_zeroed_vec;
use crate::{
    Buffer, BufferKind, BufferStorage, DeviceAllocator, MemoryError, PoolStats, PooledBuffer,
};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default time an acquirer waits for a buffer.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on buffers of one kind.
pub const DEFAULT_MAX_BUFFERS: usize = 100;

/// Pool sizing and waiting policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Size of every buffer in bytes.
    pub buffer_size: usize,
    /// How long [`BufferPool::acquire`] waits before failing.
    pub acquire_timeout: Duration,
    /// Maximum number of hardware buffers, including reserved ones.
    pub max_hardware_buffers: usize,
    /// Maximum number of local buffers, including reserved ones.
    pub max_local_buffers: usize,
}

impl PoolConfig {
    /// Creates a config with the default timeout and caps.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            max_hardware_buffers: DEFAULT_MAX_BUFFERS,
            max_local_buffers: DEFAULT_MAX_BUFFERS,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the same cap for both kinds.
    pub fn with_max_buffers(mut self, max: usize) -> Self {
        self.max_hardware_buffers = max;
        self.max_local_buffers = max;
        self
    }

    fn cap(&self, kind: BufferKind) -> usize {
        match kind {
            BufferKind::Hardware => self.max_hardware_buffers,
            BufferKind::Local => self.max_local_buffers,
        }
    }
}

#[derive(Default)]
struct PoolState {
    next_id: usize,
    hardware_count: usize,
    local_count: usize,
    free_hardware: Vec<Arc<Buffer>>,
    free_local: Vec<Arc<Buffer>>,
}

impl PoolState {
    fn count(&self, kind: BufferKind) -> usize {
        match kind {
            BufferKind::Hardware => self.hardware_count,
            BufferKind::Local => self.local_count,
        }
    }

    fn free_list(&mut self, kind: BufferKind) -> &mut Vec<Arc<Buffer>> {
        match kind {
            BufferKind::Hardware => &mut self.free_hardware,
            BufferKind::Local => &mut self.free_local,
        }
    }
}

/// Internal pool state, shared between the pool and buffer handles via `Arc`.
pub struct PoolInner {
    config: PoolConfig,
    allocator: Arc<dyn DeviceAllocator>,
    state: Mutex<PoolState>,
    released: Condvar,
    stats: Mutex<PoolStats>,
}

impl PoolInner {
    /// Called by `PooledBuffer::drop` to return a buffer to its free list.
    pub(crate) fn release(&self, buffer: Arc<Buffer>) {
        buffer.pending().set_target(0);
        self.lock_stats().record_release();

        let mut state = self.lock_state();
        state.free_list(buffer.kind()).push(buffer);
        drop(state);
        // Both kinds share one condvar, so every waiter re-checks its list.
        self.released.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stats(&self) -> MutexGuard<'_, PoolStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates one buffer of `kind` if the cap allows. The caller holds the
    /// state lock.
    fn create(&self, state: &mut PoolState, kind: BufferKind) -> Result<Arc<Buffer>, MemoryError> {
        let cap = self.config.cap(kind);
        if state.count(kind) >= cap {
            return Err(MemoryError::AllocationFailed {
                kind,
                bytes: self.config.buffer_size,
                detail: format!("pool cap of {cap} {kind} buffers reached"),
            });
        }

        let bytes = self.config.buffer_size;
        let storage = match kind {
            BufferKind::Hardware => self.allocator.allocate(bytes).map(BufferStorage::Device),
            BufferKind::Local => try_zeroed_vec(kind, bytes).map(BufferStorage::Local),
        };
        let storage = match storage {
            Ok(storage) => storage,
            Err(e) => {
                self.lock_stats().record_allocation_failure();
                return Err(e);
            }
        };

        let buffer = Arc::new(Buffer::new(state.next_id, kind, storage));
        state.next_id += 1;
        match kind {
            BufferKind::Hardware => state.hardware_count += 1,
            BufferKind::Local => state.local_count += 1,
        }
        self.lock_stats().record_created(kind);
        Ok(buffer)
    }
}

/// The runtime's buffer allocator.
///
/// # Example
/// ```
/// use memory_manager::{BufferKind, BufferPool, HostAllocator, PoolConfig};
/// use std::sync::Arc;
///
/// let pool = BufferPool::new(PoolConfig::new(4096), Arc::new(HostAllocator));
/// assert_eq!(pool.reserve(2, BufferKind::Hardware), 2);
///
/// let buf = pool.acquire(BufferKind::Hardware).unwrap();
/// assert_eq!(pool.free_count(BufferKind::Hardware), 1);
///
/// // The buffer goes back to the pool when the handle is dropped.
/// drop(buf);
/// assert_eq!(pool.free_count(BufferKind::Hardware), 2);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates an empty pool. Hardware buffers come from `allocator`, local
    /// buffers from the host heap.
    pub fn new(config: PoolConfig, allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                allocator,
                state: Mutex::new(PoolState::default()),
                released: Condvar::new(),
                stats: Mutex::new(PoolStats::default()),
            }),
        }
    }

    /// Eagerly creates up to `count` buffers of `kind` and returns how many
    /// were created. Stops at the first allocation failure; callers treat a
    /// shortfall at start-up as fatal.
    pub fn reserve(&self, count: usize, kind: BufferKind) -> usize {
        if self.inner.config.buffer_size == 0 {
            tracing::warn!("refusing to reserve zero-sized {kind} buffers");
            return 0;
        }

        let mut state = self.inner.lock_state();
        let mut created = 0;
        while created < count {
            match self.inner.create(&mut state, kind) {
                Ok(buffer) => {
                    state.free_list(kind).push(buffer);
                    created += 1;
                }
                Err(e) => {
                    tracing::warn!("reserved {created}/{count} {kind} buffers: {e}");
                    break;
                }
            }
        }
        drop(state);

        if created > 0 {
            self.inner.released.notify_all();
        }
        tracing::debug!(
            "reserved {created} {kind} buffers of {} bytes",
            self.inner.config.buffer_size
        );
        created
    }

    /// Acquires a free buffer of `kind`.
    ///
    /// Takes one from the free list if possible, otherwise creates one
    /// (within the cap), otherwise waits for a release.
    ///
    /// # Errors
    /// Returns [`MemoryError::ZeroSizedAllocation`] for a zero buffer size,
    /// or [`MemoryError::AcquireTimeout`] if no buffer became available
    /// within the configured timeout.
    pub fn acquire(&self, kind: BufferKind) -> Result<PooledBuffer, MemoryError> {
        if self.inner.config.buffer_size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        let timeout = self.inner.config.acquire_timeout;
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock_state();

        let (buffer, from_free_list) = loop {
            if let Some(buffer) = state.free_list(kind).pop() {
                break (buffer, true);
            }
            if state.count(kind) < self.inner.config.cap(kind) {
                match self.inner.create(&mut state, kind) {
                    Ok(buffer) => {
                        tracing::debug!("pool grew: new {kind} buffer {}", buffer.id());
                        break (buffer, false);
                    }
                    Err(e) => tracing::warn!("lazy {kind} reservation failed: {e}"),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                drop(state);
                self.inner.lock_stats().record_timeout();
                return Err(MemoryError::AcquireTimeout {
                    kind,
                    waited: timeout,
                });
            }
            state = self
                .inner
                .released
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        };
        drop(state);

        self.inner.lock_stats().record_acquire(from_free_list);
        Ok(PooledBuffer::new(buffer, Arc::clone(&self.inner)))
    }

    /// Size of every buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.inner.config.buffer_size
    }

    /// Buffers of `kind` that exist (free or in use).
    pub fn total_count(&self, kind: BufferKind) -> usize {
        self.inner.lock_state().count(kind)
    }

    /// Buffers of `kind` currently on the free list.
    pub fn free_count(&self, kind: BufferKind) -> usize {
        self.inner.lock_state().free_list(kind).len()
    }

    /// Returns a snapshot of pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.inner.lock_stats().clone()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size())
            .field("hardware", &self.total_count(BufferKind::Hardware))
            .field("local", &self.total_count(BufferKind::Local))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostAllocator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    fn pool(size: usize) -> BufferPool {
        BufferPool::new(PoolConfig::new(size), Arc::new(HostAllocator))
    }

    /// Allocator that fails after `limit` blocks.
    #[derive(Debug)]
    struct LimitedAllocator {
        limit: usize,
        issued: AtomicUsize,
    }

    impl DeviceAllocator for LimitedAllocator {
        fn allocate(&self, bytes: usize) -> Result<Box<dyn crate::DeviceMemory>, MemoryError> {
            if self.issued.fetch_add(1, Ordering::SeqCst) >= self.limit {
                return Err(MemoryError::AllocationFailed {
                    kind: BufferKind::Hardware,
                    bytes,
                    detail: "device full".into(),
                });
            }
            HostAllocator.allocate(bytes)
        }
    }

    #[test]
    fn test_reserve_and_acquire() {
        let pool = pool(64);
        assert_eq!(pool.reserve(3, BufferKind::Local), 3);
        assert_eq!(pool.total_count(BufferKind::Local), 3);

        let buf = pool.acquire(BufferKind::Local).unwrap();
        assert_eq!(buf.size(), 64);
        assert_eq!(buf.kind(), BufferKind::Local);
        assert_eq!(pool.free_count(BufferKind::Local), 2);
    }

    #[test]
    fn test_reserve_shortfall() {
        let allocator = Arc::new(LimitedAllocator {
            limit: 2,
            issued: AtomicUsize::new(0),
        });
        let pool = BufferPool::new(PoolConfig::new(64), allocator);
        assert_eq!(pool.reserve(5, BufferKind::Hardware), 2);
        assert_eq!(pool.stats().allocation_failures, 1);
    }

    #[test]
    fn test_reserve_respects_cap() {
        let pool = BufferPool::new(PoolConfig::new(64).with_max_buffers(2), Arc::new(HostAllocator));
        assert_eq!(pool.reserve(4, BufferKind::Local), 2);
    }

    #[test]
    fn test_lazy_growth() {
        let pool = pool(32);
        let a = pool.acquire(BufferKind::Hardware).unwrap();
        let b = pool.acquire(BufferKind::Hardware).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().lazy_reservations, 2);
        assert!(a.physical_address().is_some());
    }

    #[test]
    fn test_release_reuses_buffer() {
        let pool = pool(32);
        pool.reserve(1, BufferKind::Local);
        let id = pool.acquire(BufferKind::Local).unwrap().id();
        let again = pool.acquire(BufferKind::Local).unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.stats().free_list_hits, 2);
    }

    #[test]
    fn test_release_resets_pending() {
        let pool = pool(32);
        let buf = pool.acquire(BufferKind::Local).unwrap();
        buf.set_pending(3);
        let shared = buf.shared();
        drop(buf);
        assert!(!shared.is_pending());
    }

    #[test]
    fn test_acquire_timeout() {
        let config = PoolConfig::new(16)
            .with_max_buffers(1)
            .with_acquire_timeout(Duration::from_millis(50));
        let pool = BufferPool::new(config, Arc::new(HostAllocator));
        let _held = pool.acquire(BufferKind::Local).unwrap();

        let start = Instant::now();
        let err = pool.acquire(BufferKind::Local).unwrap_err();
        assert!(matches!(err, MemoryError::AcquireTimeout { kind: BufferKind::Local, .. }));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[test]
    fn test_blocked_acquirer_wakes_on_release() {
        let config = PoolConfig::new(16).with_max_buffers(1);
        let pool = BufferPool::new(config, Arc::new(HostAllocator));
        let held = pool.acquire(BufferKind::Hardware).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let buf = pool.acquire(BufferKind::Hardware).unwrap();
                tx.send(buf.id()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        let id = held.id();
        drop(held);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), id);
        waiter.join().unwrap();
    }

    #[test]
    fn test_kinds_are_separate() {
        let pool = BufferPool::new(PoolConfig::new(16).with_max_buffers(1), Arc::new(HostAllocator));
        let _hw = pool.acquire(BufferKind::Hardware).unwrap();
        let local = pool.acquire(BufferKind::Local).unwrap();
        assert_eq!(local.kind(), BufferKind::Local);
    }

    #[test]
    fn test_zero_sized() {
        let pool = pool(0);
        assert_eq!(pool.reserve(1, BufferKind::Local), 0);
        assert!(matches!(
            pool.acquire(BufferKind::Local),
            Err(MemoryError::ZeroSizedAllocation)
        ));
    }

    #[test]
    fn test_debug_format() {
        let pool = pool(128);
        let debug = format!("{pool:?}");
        assert!(debug.contains("BufferPool"));
        assert!(debug.contains("buffer_size"));
    }
}
