// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for layer dispatch.

use memory_manager::MemoryError;
use std::path::PathBuf;
use tensor_core::TensorError;

/// Errors raised while talking to the accelerator or simulating it.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A device node or sysfs attribute could not be opened or read.
    #[error("cannot access device '{}': {source}", path.display())]
    Device {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Mapping device memory into the process failed.
    #[error("failed to map {what}: {detail}")]
    MapFailed { what: &'static str, detail: String },

    /// A register access fell outside the mapped window.
    #[error("register offset {offset:#x} outside {span:#x}-byte window")]
    RegisterOutOfBounds { offset: usize, span: usize },

    /// A register access was not 32-bit aligned.
    #[error("unaligned register offset {offset:#x}")]
    UnalignedRegister { offset: usize },

    /// The accelerator was handed a buffer it cannot address.
    #[error("buffer {id} has no bus address")]
    NotDeviceBuffer { id: usize },

    /// Input and output of a dispatch are the same buffer.
    #[error("buffer {id} used as both input and output")]
    AliasedBuffers { id: usize },

    /// No weights are installed for the requested bank.
    #[error("no weight bank {bank} in memory channel {channel}")]
    MissingWeights { bank: usize, channel: usize },

    /// A buffer is too small for the layer geometry.
    #[error("{what} needs {expected} bytes, buffer has {actual}")]
    BufferTooSmall {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
