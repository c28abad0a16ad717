// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the inference runtime.

use std::path::PathBuf;

/// Errors that can occur while setting up or running inference.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A weight or threshold file could not be read.
    #[error("weight loading failed for '{}': {detail}", path.display())]
    WeightLoadError { path: PathBuf, detail: String },

    /// A caller-supplied buffer does not fit the network.
    #[error("{what}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An operation was called before the runtime was initialised.
    #[error("runtime not initialised: {0}")]
    NotInitialised(&'static str),

    /// A background job failed; the batch result is unusable.
    #[error("background job failed: {0}")]
    JobFailed(String),

    /// Loading the bitstream through the FPGA manager failed.
    #[error("cannot load bitstream '{}': {detail}", path.display())]
    BitstreamError { path: PathBuf, detail: String },

    /// Buffer pool error.
    #[error("memory error: {0}")]
    Memory(#[from] memory_manager::MemoryError),

    /// Network description error.
    #[error("model error: {0}")]
    Model(#[from] model_ir::ModelError),

    /// Accelerator or reference backend error.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] dispatcher::DispatchError),

    /// Tensor repacking error.
    #[error("tensor error: {0}")]
    Tensor(#[from] tensor_core::TensorError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
