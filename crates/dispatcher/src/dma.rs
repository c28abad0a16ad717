// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Contiguous DMA memory from a udmabuf region.
//!
//! The whole region is mapped once; [`DmaAllocator`] carves aligned blocks
//! from it and recycles freed blocks. Each [`DmaBlock`] knows its bus
//! address (region base + offset) and hands its span back when dropped.
//!
//! ```text
//!  region ┌────────┬────────┬──────────┬───────────── … ─┐
//!         │ block  │ (free) │  block   │   unused tail    │
//!         └────────┴────────┴──────────┴───────────── … ─┘
//!         ▲ phys_addr                  ▲ cursor
//! ```

use crate::{DeviceConfig, DispatchError};
use memory_manager::{BufferKind, DeviceAllocator, DeviceMemory, MemoryError};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

// ── Block bookkeeping ──────────────────────────────────────────

/// First-fit bookkeeping of blocks inside a fixed-size region.
#[derive(Debug)]
pub(crate) struct BlockCarver {
    capacity: usize,
    alignment: usize,
    cursor: usize,
    /// Freed `(offset, len)` spans, reused before the cursor advances.
    free: Vec<(usize, usize)>,
}

impl BlockCarver {
    pub(crate) fn new(capacity: usize, alignment: usize) -> Self {
        Self {
            capacity,
            alignment: alignment.max(1),
            cursor: 0,
            free: Vec::new(),
        }
    }

    /// Returns `(offset, len)` of a block of at least `bytes` bytes.
    pub(crate) fn carve(&mut self, bytes: usize) -> Option<(usize, usize)> {
        let len = tensor_core::pad_to(bytes.max(1), self.alignment);
        if let Some(pos) = self.free.iter().position(|&(_, l)| l >= len) {
            return Some(self.free.swap_remove(pos));
        }
        if self.capacity - self.cursor < len {
            return None;
        }
        let offset = self.cursor;
        self.cursor += len;
        Some((offset, len))
    }

    pub(crate) fn give_back(&mut self, offset: usize, len: usize) {
        if offset + len == self.cursor {
            self.cursor = offset;
        } else {
            self.free.push((offset, len));
        }
    }

    pub(crate) fn in_use(&self) -> usize {
        self.cursor - self.free.iter().map(|&(_, l)| l).sum::<usize>()
    }
}

// ── Mapped region ──────────────────────────────────────────────

#[derive(Debug)]
struct DmaRegion {
    ptr: NonNull<u8>,
    len: usize,
    phys: u64,
    carver: Mutex<BlockCarver>,
    _file: File,
}

// SAFETY: the region is a shared mapping owned by this struct; blocks carved
// from it are disjoint and the carver is behind a mutex, so the region can
// be shared and sent across threads.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len are exactly the mapping created in
        // `DmaAllocator::open`; every block holds an Arc to the region, so
        // none is alive when this runs.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.len) } {
            tracing::warn!("munmap of DMA region failed: {e}");
        }
    }
}

/// One block of DMA memory.
#[derive(Debug)]
pub struct DmaBlock {
    region: Arc<DmaRegion>,
    offset: usize,
    len: usize,
    requested: usize,
}

impl DeviceMemory for DmaBlock {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: [offset, offset + requested) lies inside the mapping and
        // belongs to this block alone until it is dropped.
        unsafe {
            std::slice::from_raw_parts(self.region.ptr.as_ptr().add(self.offset), self.requested)
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusive access.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.region.ptr.as_ptr().add(self.offset),
                self.requested,
            )
        }
    }

    fn physical_address(&self) -> u64 {
        self.region.phys + self.offset as u64
    }
}

impl Drop for DmaBlock {
    fn drop(&mut self) {
        self.region
            .carver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .give_back(self.offset, self.len);
    }
}

// ── Allocator ──────────────────────────────────────────────────

/// Allocator over a mapped udmabuf region.
#[derive(Debug, Clone)]
pub struct DmaAllocator {
    region: Arc<DmaRegion>,
}

impl DmaAllocator {
    /// Maps the udmabuf device described by `cfg`.
    pub fn open(cfg: &DeviceConfig) -> Result<Self, DispatchError> {
        let phys = parse_sysfs_number(&read_sysfs(&cfg.dma_phys_addr)?).ok_or_else(|| {
            DispatchError::MapFailed {
                what: "DMA region",
                detail: format!("unreadable physical address in {}", cfg.dma_phys_addr.display()),
            }
        })?;
        let len = parse_sysfs_number(&read_sysfs(&cfg.dma_size)?)
            .map(|n| n as usize)
            .filter(|&n| n > 0)
            .ok_or_else(|| DispatchError::MapFailed {
                what: "DMA region",
                detail: format!("unreadable size in {}", cfg.dma_size.display()),
            })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&cfg.dma_device)
            .map_err(|source| DispatchError::Device {
                path: cfg.dma_device.clone(),
                source,
            })?;

        // SAFETY: the fd stays open for the lifetime of the mapping (kept in
        // the region), len is the device's reported size and non-zero, and
        // the mapping is released in `DmaRegion::drop`.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| DispatchError::MapFailed {
            what: "DMA region",
            detail: format!("{}: {e}", cfg.dma_device.display()),
        })?;
        let ptr = NonNull::new(addr.cast::<u8>()).ok_or(DispatchError::MapFailed {
            what: "DMA region",
            detail: "mmap returned null".into(),
        })?;

        tracing::info!(
            "mapped DMA region {} ({} KiB at bus address {phys:#x})",
            cfg.dma_device.display(),
            len / 1024
        );
        Ok(Self {
            region: Arc::new(DmaRegion {
                ptr,
                len,
                phys,
                carver: Mutex::new(BlockCarver::new(len, cfg.dma_alignment)),
                _file: file,
            }),
        })
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.region
            .carver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_use()
    }
}

impl DeviceAllocator for DmaAllocator {
    fn allocate(&self, bytes: usize) -> Result<Box<dyn DeviceMemory>, MemoryError> {
        let carved = self
            .region
            .carver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .carve(bytes);
        let (offset, len) = carved.ok_or_else(|| MemoryError::AllocationFailed {
            kind: BufferKind::Hardware,
            bytes,
            detail: format!("DMA region of {} bytes exhausted", self.region.len),
        })?;
        let mut block = DmaBlock {
            region: Arc::clone(&self.region),
            offset,
            len,
            requested: bytes,
        };
        block.as_mut_slice().fill(0);
        Ok(Box::new(block))
    }
}

fn read_sysfs(path: &Path) -> Result<String, DispatchError> {
    std::fs::read_to_string(path).map_err(|source| DispatchError::Device {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses a sysfs number, hexadecimal when prefixed with `0x`.
fn parse_sysfs_number(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}
