// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool-owned buffers and their backing storage.
//!
//! A [`Buffer`] is a fixed-size byte region tagged [`BufferKind::Hardware`]
//! (reachable by the accelerator's DMA engine) or [`BufferKind::Local`]
//! (plain host memory). Besides its bytes it carries two coordination
//! primitives:
//!
//! - a **claim**: set while the accelerator reads or writes the buffer
//!   (between dispatch and sync). [`Buffer::is_claimed`] is the non-blocking
//!   "is this buffer in use" query.
//! - a [`Rendezvous`]: the pending-writer count that orders pipeline stages.
//!
//! Storage is released exactly once, when the last reference to the buffer
//! drops: host memory through `Vec`'s destructor, device memory through the
//! [`DeviceMemory`] implementation's own `Drop`.

use crate::{MemoryError, Rendezvous};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Where a buffer's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    /// DMA-capable memory with a physical address.
    Hardware,
    /// Host-only memory.
    Local,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware => f.write_str("hardware"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// A block of memory the accelerator can address.
///
/// Implementations free their memory in `Drop`.
pub trait DeviceMemory: Send + fmt::Debug {
    /// The block's bytes.
    fn as_slice(&self) -> &[u8];
    /// The block's bytes, mutably.
    fn as_mut_slice(&mut self) -> &mut [u8];
    /// Bus address handed to the accelerator.
    fn physical_address(&self) -> u64;
}

/// Source of [`DeviceMemory`] blocks.
pub trait DeviceAllocator: Send + Sync + fmt::Debug {
    /// Allocates a zeroed block of `bytes` bytes.
    ///
    /// # Errors
    /// Returns [`MemoryError::AllocationFailed`] when the device has no
    /// room left.
    fn allocate(&self, bytes: usize) -> Result<Box<dyn DeviceMemory>, MemoryError>;
}

/// Plain host memory posing as device memory.
///
/// Used by the software backend, where the "accelerator" runs on the CPU
/// and the physical address is just the host address.
#[derive(Debug)]
pub struct HostMemory {
    data: Vec<u8>,
}

impl HostMemory {
    /// Allocates `bytes` zeroed bytes, reporting failure instead of aborting.
    pub fn zeroed(bytes: usize) -> Result<Self, MemoryError> {
        Ok(Self {
            data: try_zeroed_vec(BufferKind::Hardware, bytes)?,
        })
    }
}

impl DeviceMemory for HostMemory {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn physical_address(&self) -> u64 {
        self.data.as_ptr() as u64
    }
}

/// Allocator handing out [`HostMemory`] blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostAllocator;

impl DeviceAllocator for HostAllocator {
    fn allocate(&self, bytes: usize) -> Result<Box<dyn DeviceMemory>, MemoryError> {
        Ok(Box::new(HostMemory::zeroed(bytes)?))
    }
}

pub(crate) fn try_zeroed_vec(kind: BufferKind, bytes: usize) -> Result<Vec<u8>, MemoryError> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|e| MemoryError::AllocationFailed {
            kind,
            bytes,
            detail: e.to_string(),
        })?;
    data.resize(bytes, 0);
    Ok(data)
}

/// Backing bytes of a [`Buffer`], tagged by kind.
#[derive(Debug)]
pub enum BufferStorage {
    Local(Vec<u8>),
    Device(Box<dyn DeviceMemory>),
}

impl BufferStorage {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Local(data) => data,
            Self::Device(mem) => mem.as_slice(),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Local(data) => data,
            Self::Device(mem) => mem.as_mut_slice(),
        }
    }

    /// Bus address, if the storage is device memory.
    pub fn physical_address(&self) -> Option<u64> {
        match self {
            Self::Local(_) => None,
            Self::Device(mem) => Some(mem.physical_address()),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct Claim {
    claimed: Mutex<bool>,
    released: Condvar,
}

impl Claim {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reusable, pool-owned byte region.
///
/// Obtain buffers from [`BufferPool::acquire`](crate::BufferPool::acquire);
/// they return to the pool when the [`PooledBuffer`](crate::PooledBuffer)
/// handle drops.
pub struct Buffer {
    id: usize,
    kind: BufferKind,
    size: usize,
    storage: Mutex<BufferStorage>,
    claim: Claim,
    pending: Rendezvous,
}

impl Buffer {
    pub(crate) fn new(id: usize, kind: BufferKind, storage: BufferStorage) -> Self {
        Self {
            id,
            kind,
            size: storage.len(),
            storage: Mutex::new(storage),
            claim: Claim::default(),
            pending: Rendezvous::new(),
        }
    }

    /// Pool-unique identifier.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Locks the buffer's bytes for reading or writing.
    pub fn data(&self) -> MutexGuard<'_, BufferStorage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bus address of the current storage (device memory only).
    pub fn physical_address(&self) -> Option<u64> {
        self.data().physical_address()
    }

    // ── Pending-writer rendezvous ──────────────────────────────

    /// The buffer's pending-writer rendezvous.
    pub fn pending(&self) -> &Rendezvous {
        &self.pending
    }

    /// Shorthand for `pending().set_target(count)`.
    pub fn set_pending(&self, count: usize) {
        self.pending.set_target(count);
    }

    /// Shorthand for `pending().arrive()`.
    pub fn arrive(&self) -> bool {
        self.pending.arrive()
    }

    /// Shorthand for `pending().wait_settled()`.
    pub fn wait_settled(&self) {
        self.pending.wait_settled();
    }

    /// Shorthand for `pending().is_pending()`.
    pub fn is_pending(&self) -> bool {
        self.pending.is_pending()
    }

    // ── Accelerator claim ──────────────────────────────────────

    /// Claims the buffer, blocking while another claim is held.
    pub fn claim(&self) {
        let mut claimed = self.claim.lock();
        while *claimed {
            claimed = self
                .claim
                .released
                .wait(claimed)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *claimed = true;
    }

    /// Claims the buffer if it is free; returns whether the claim was taken.
    pub fn try_claim(&self) -> bool {
        let mut claimed = self.claim.lock();
        if *claimed {
            return false;
        }
        *claimed = true;
        true
    }

    /// Drops the claim and wakes waiters.
    pub fn unclaim(&self) {
        *self.claim.lock() = false;
        self.claim.released.notify_all();
    }

    /// `true` while the accelerator holds a claim.
    pub fn is_claimed(&self) -> bool {
        *self.claim.lock()
    }

    /// Blocks until no claim is held.
    pub fn wait_unclaimed(&self) {
        let mut claimed = self.claim.lock();
        while *claimed {
            claimed = self
                .claim
                .released
                .wait(claimed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    // ── Content transfer ───────────────────────────────────────

    /// Copies the first `bytes` bytes of `src` into this buffer.
    ///
    /// # Errors
    /// Returns [`MemoryError::TransferTooLarge`] if either buffer is shorter
    /// than `bytes`.
    pub fn copy_from(&self, src: &Buffer, bytes: usize) -> Result<(), MemoryError> {
        let available = self.size.min(src.size);
        if bytes > available {
            return Err(MemoryError::TransferTooLarge {
                requested: bytes,
                available,
            });
        }
        if self.id == src.id {
            return Ok(());
        }
        let (mut dst, src) = lock_pair(self, src);
        dst.as_mut_slice()[..bytes].copy_from_slice(&src.as_slice()[..bytes]);
        Ok(())
    }

    /// Copies a host slice into the start of this buffer.
    pub fn write_from_slice(&self, bytes: &[u8]) -> Result<(), MemoryError> {
        if bytes.len() > self.size {
            return Err(MemoryError::TransferTooLarge {
                requested: bytes.len(),
                available: self.size,
            });
        }
        self.data().as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Exchanges the storage of two buffers of the same kind.
    ///
    /// Both buffers keep their identity, claim and rendezvous; only the
    /// bytes (and, for device memory, the bus address) move.
    ///
    /// # Errors
    /// Returns [`MemoryError::PoolCorruption`] if the kinds differ.
    pub fn swap_storage(&self, other: &Buffer) -> Result<(), MemoryError> {
        if self.kind != other.kind {
            return Err(MemoryError::PoolCorruption(format!(
                "cannot swap {} buffer {} with {} buffer {}",
                self.kind, self.id, other.kind, other.id
            )));
        }
        if self.id == other.id {
            return Ok(());
        }
        let (mut a, mut b) = lock_pair(self, other);
        std::mem::swap(&mut *a, &mut *b);
        Ok(())
    }

    /// Moves `src`'s contents into this buffer: a storage swap when the
    /// kinds match, otherwise a copy of the first `bytes` bytes.
    pub fn swap_or_copy(&self, src: &Buffer, bytes: usize) -> Result<(), MemoryError> {
        if self.kind == src.kind {
            self.swap_storage(src)
        } else {
            self.copy_from(src, bytes)
        }
    }
}

/// Locks two distinct buffers in id order so concurrent transfers between
/// the same pair cannot deadlock. Returns the guards as `(a, b)`.
///
/// `a` and `b` must be different buffers.
pub fn lock_pair<'a>(
    a: &'a Buffer,
    b: &'a Buffer,
) -> (MutexGuard<'a, BufferStorage>, MutexGuard<'a, BufferStorage>) {
    if a.id < b.id {
        let ga = a.data();
        let gb = b.data();
        (ga, gb)
    } else {
        let gb = b.data();
        let ga = a.data();
        (ga, gb)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("pending", &self.pending.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: usize, bytes: &[u8]) -> Buffer {
        Buffer::new(id, BufferKind::Local, BufferStorage::Local(bytes.to_vec()))
    }

    fn hardware(id: usize, bytes: &[u8]) -> Buffer {
        let mut mem = HostMemory::zeroed(bytes.len()).unwrap();
        mem.as_mut_slice().copy_from_slice(bytes);
        Buffer::new(id, BufferKind::Hardware, BufferStorage::Device(Box::new(mem)))
    }

    #[test]
    fn test_copy_from() {
        let a = local(0, &[0; 4]);
        let b = local(1, &[1, 2, 3, 4]);
        a.copy_from(&b, 3).unwrap();
        assert_eq!(a.data().as_slice(), &[1, 2, 3, 0]);
    }

    #[test]
    fn test_copy_too_large() {
        let a = local(0, &[0; 4]);
        let b = local(1, &[0; 8]);
        assert!(matches!(
            a.copy_from(&b, 8),
            Err(MemoryError::TransferTooLarge { .. })
        ));
    }

    #[test]
    fn test_swap_moves_physical_address() {
        let a = hardware(0, &[1; 8]);
        let b = hardware(1, &[2; 8]);
        let (pa, pb) = (a.physical_address(), b.physical_address());

        a.swap_storage(&b).unwrap();

        assert_eq!(a.data().as_slice(), &[2; 8]);
        assert_eq!(b.data().as_slice(), &[1; 8]);
        assert_eq!(a.physical_address(), pb);
        assert_eq!(b.physical_address(), pa);
    }

    #[test]
    fn test_swap_kind_mismatch() {
        let a = hardware(0, &[1; 8]);
        let b = local(1, &[2; 8]);
        assert!(a.swap_storage(&b).is_err());
        // swap_or_copy falls back to a copy.
        a.swap_or_copy(&b, 8).unwrap();
        assert_eq!(a.data().as_slice(), &[2; 8]);
        assert_eq!(a.kind(), BufferKind::Hardware);
    }

    #[test]
    fn test_claim_cycle() {
        let a = local(0, &[0; 4]);
        assert!(!a.is_claimed());
        assert!(a.try_claim());
        assert!(!a.try_claim());
        assert!(a.is_claimed());
        a.unclaim();
        a.wait_unclaimed();
        a.claim();
        assert!(a.is_claimed());
    }

    #[test]
    fn test_local_storage_has_no_address() {
        let a = local(0, &[0; 4]);
        assert_eq!(a.physical_address(), None);
        assert!(hardware(1, &[0; 4]).physical_address().is_some());
    }
}
