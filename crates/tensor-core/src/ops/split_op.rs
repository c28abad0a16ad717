// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Channel split: extract one channel group per pixel.

use super::bit_copy;
use crate::{ChannelLayout, ChannelSlice, TensorError};

/// For every pixel, copies channel group `slice.index` (of width
/// `slice.channels`) from `src` into channel offset 0 of `dst`. The rest of
/// each destination pixel is zero-filled.
///
/// # Errors
/// Returns [`TensorError::InvalidGeometry`] if the group lies outside the
/// pixel, or [`TensorError::BufferTooSmall`] if either map is short.
pub fn split_channel_slice(
    dst: &mut [u8],
    src: &[u8],
    layout: &ChannelLayout,
    slice: ChannelSlice,
) -> Result<(), TensorError> {
    const OP: &str = "split_channel_slice";
    let slice_bits = layout.channel_bits(slice.channels);
    layout.check_pixel_bits(OP, slice_bits * (slice.index + 1))?;
    layout.check_map(OP, dst, slice.dim)?;
    layout.check_map(OP, src, slice.dim)?;

    let stride = layout.pixel_stride();
    for pixel in 0..slice.pixels() {
        let base = pixel * stride;
        let dst_px = &mut dst[base..base + stride];
        dst_px.fill(0);
        bit_copy(
            dst_px,
            0,
            &src[base..base + stride],
            slice.index * slice_bits,
            slice_bits,
        )?;
    }
    Ok(())
}
