// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for packed tensor operations.

/// Errors that can occur during bit-level buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    /// A bit range extends past the end of a buffer.
    #[error("{op}: bit range {offset}..{end} exceeds buffer of {available_bits} bits")]
    BitRangeOutOfBounds {
        op: &'static str,
        offset: usize,
        end: usize,
        available_bits: usize,
    },

    /// A buffer is smaller than the layout requires.
    #[error("{op}: buffer too small, expected at least {expected} bytes, got {actual}")]
    BufferTooSmall {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The requested channel geometry does not fit the pixel layout.
    #[error("{op}: invalid geometry: {detail}")]
    InvalidGeometry { op: &'static str, detail: String },

    /// An element count of zero was passed where elements are required.
    #[error("{op}: element count must be non-zero")]
    ZeroElements { op: &'static str },
}
