// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool statistics for profiling and diagnostics.
//!
//! [`PoolStats`] tracks how the buffer pool is being used: how often an
//! acquire was served from the free list versus by growing the pool, how
//! many acquires timed out, and the high-water mark of buffers in use.
//! These numbers are what you look at when deciding how many buffers to
//! reserve up front.

use crate::BufferKind;

/// Cumulative statistics about buffer pool usage.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    /// Hardware buffers created (eagerly or lazily).
    pub hardware_buffers: u64,
    /// Local buffers created (eagerly or lazily).
    pub local_buffers: u64,
    /// Total number of successful acquires.
    pub acquisitions: u64,
    /// Acquires served from the free list.
    pub free_list_hits: u64,
    /// Acquires that had to create a new buffer.
    pub lazy_reservations: u64,
    /// Acquires that gave up after the timeout.
    pub timeouts: u64,
    /// Allocation attempts the backing allocator refused.
    pub allocation_failures: u64,
    /// Buffers returned to the pool.
    pub releases: u64,
    /// Buffers currently handed out.
    pub in_use: u64,
    /// Peak number of buffers handed out at once.
    pub peak_in_use: u64,
}

impl PoolStats {
    /// Fraction of acquires served from the free list, in `[0.0, 1.0]`.
    ///
    /// Returns `0.0` if nothing has been acquired yet.
    pub fn free_list_hit_ratio(&self) -> f64 {
        if self.acquisitions == 0 {
            return 0.0;
        }
        self.free_list_hits as f64 / self.acquisitions as f64
    }

    pub(crate) fn record_created(&mut self, kind: BufferKind) {
        match kind {
            BufferKind::Hardware => self.hardware_buffers += 1,
            BufferKind::Local => self.local_buffers += 1,
        }
    }

    pub(crate) fn record_acquire(&mut self, from_free_list: bool) {
        self.acquisitions += 1;
        if from_free_list {
            self.free_list_hits += 1;
        } else {
            self.lazy_reservations += 1;
        }
        self.in_use += 1;
        if self.in_use > self.peak_in_use {
            self.peak_in_use = self.in_use;
        }
    }

    pub(crate) fn record_release(&mut self) {
        self.releases += 1;
        self.in_use = self.in_use.saturating_sub(1);
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub(crate) fn record_allocation_failure(&mut self) {
        self.allocation_failures += 1;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Buffers: {} hardware, {} local; {} acquires ({:.0}% from free list, {} lazy), \
             {} timeouts, peak {} in use",
            self.hardware_buffers,
            self.local_buffers,
            self.acquisitions,
            self.free_list_hit_ratio() * 100.0,
            self.lazy_reservations,
            self.timeouts,
            self.peak_in_use,
        )
    }
}
