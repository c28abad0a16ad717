// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for buffer pool management.

use crate::BufferKind;
use std::time::Duration;

/// Errors that can occur while reserving, acquiring or moving buffers.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The backing allocator could not provide memory.
    #[error("cannot allocate {bytes}-byte {kind} buffer: {detail}")]
    AllocationFailed {
        kind: BufferKind,
        bytes: usize,
        detail: String,
    },

    /// No buffer of the requested kind became free in time.
    #[error("timed out after {waited:?} waiting for a free {kind} buffer")]
    AcquireTimeout { kind: BufferKind, waited: Duration },

    /// Attempted to create a pool of zero-sized buffers.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    /// A copy or swap was asked to move more bytes than a buffer holds.
    #[error("transfer of {requested} bytes exceeds buffer size {available}")]
    TransferTooLarge { requested: usize, available: usize },

    /// An internal pool inconsistency was detected.
    #[error("pool integrity error: {0}")]
    PoolCorruption(String),
}
