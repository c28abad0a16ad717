// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pixel-major packed channel layout.
//!
//! Feature maps exchanged with the accelerator are stored pixel by pixel.
//! Every pixel occupies the same number of bytes (the *pixel stride*), which
//! is sized for the accelerator's maximum channel count and rounded up to
//! the datapath word. Channels are packed LSB-first inside the pixel,
//! `activation_bits` each:
//!
//! ```text
//!        pixel 0                          pixel 1
//! ┌────────────────────────────┬───────┬────────────────────────────┬───────┐
//! │ c0 │ c1 │ c2 │ … │ c(n-1)  │  pad  │ c0 │ c1 │ c2 │ … │ c(n-1)  │  pad  │
//! └────────────────────────────┴───────┴────────────────────────────┴───────┘
//! ◄──────────── pixel_stride bytes ────►
//! ```
//!
//! A spatial map of dimension `dim` holds `dim × dim` pixels in row-major
//! order.

use crate::TensorError;
use std::fmt;

/// Rounds `value` up to the next multiple of `granularity`.
///
/// A granularity of zero leaves the value unchanged.
pub fn pad_to(value: usize, granularity: usize) -> usize {
    if granularity == 0 || value % granularity == 0 {
        value
    } else {
        value + granularity - (value % granularity)
    }
}

/// Per-pixel packing of quantized activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChannelLayout {
    activation_bits: usize,
    pixel_stride: usize,
}

impl ChannelLayout {
    /// Creates a layout with an explicit pixel stride in bytes.
    pub fn new(activation_bits: usize, pixel_stride: usize) -> Self {
        Self {
            activation_bits,
            pixel_stride,
        }
    }

    /// Creates the layout for an accelerator that holds at most
    /// `max_channels` channels per pixel, aligning each pixel to
    /// `align_bytes`.
    pub fn for_capacity(activation_bits: usize, max_channels: usize, align_bytes: usize) -> Self {
        let unaligned = (activation_bits * max_channels).div_ceil(8);
        Self::new(activation_bits, pad_to(unaligned, align_bytes))
    }

    /// Bits per channel value.
    pub fn activation_bits(&self) -> usize {
        self.activation_bits
    }

    /// Bytes occupied by one pixel.
    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    /// Bits occupied by `channels` packed channel values.
    pub fn channel_bits(&self, channels: usize) -> usize {
        self.activation_bits * channels
    }

    /// Bytes covered by a `dim × dim` map in this layout.
    pub fn map_bytes(&self, dim: usize) -> usize {
        self.pixel_stride * dim * dim
    }

    /// Ensures a channel bit range `[0, end_bits)` fits in one pixel.
    pub(crate) fn check_pixel_bits(&self, op: &'static str, end_bits: usize) -> Result<(), TensorError> {
        if end_bits > self.pixel_stride * 8 {
            return Err(TensorError::InvalidGeometry {
                op,
                detail: format!(
                    "channel range ends at bit {end_bits}, pixel holds {} bits",
                    self.pixel_stride * 8
                ),
            });
        }
        Ok(())
    }

    /// Ensures `buf` can hold a `dim × dim` map.
    pub(crate) fn check_map(&self, op: &'static str, buf: &[u8], dim: usize) -> Result<(), TensorError> {
        let expected = self.map_bytes(dim);
        if buf.len() < expected {
            return Err(TensorError::BufferTooSmall {
                op,
                expected,
                actual: buf.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-bit activations, {} B/pixel",
            self.activation_bits, self.pixel_stride
        )
    }
}

/// Selects one contiguous channel group of a feature map.
///
/// `channels` is the width of the group, `dim` the spatial dimension of the
/// map and `index` which group (slice, merge slot or iteration) is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSlice {
    pub channels: usize,
    pub dim: usize,
    pub index: usize,
}

impl ChannelSlice {
    pub fn new(channels: usize, dim: usize, index: usize) -> Self {
        Self {
            channels,
            dim,
            index,
        }
    }

    /// Number of pixels in the map.
    pub fn pixels(&self) -> usize {
        self.dim * self.dim
    }
}
