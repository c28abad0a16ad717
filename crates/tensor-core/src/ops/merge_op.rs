// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Channel merge: place one channel group per pixel at its slot offset.

use super::{bit_copy, clear_bits};
use crate::{ChannelLayout, ChannelSlice, TensorError};

const WORD_BITS: usize = 64;

/// For every pixel, writes the first `slice.channels` channels of `src` into
/// `dst` at bit offset `slice.index × slice.channels × activation_bits`.
///
/// When the group width is not a multiple of the 64-bit word, the bits
/// between the end of the group and the next word boundary are zeroed so
/// that residual padding never carries stale data. Earlier groups are left
/// untouched, so merging slices in index order rebuilds the full map.
///
/// # Errors
/// Returns [`TensorError::InvalidGeometry`] if the group lies outside the
/// pixel, or [`TensorError::BufferTooSmall`] if either map is short.
pub fn merge_channel_slice(
    dst: &mut [u8],
    src: &[u8],
    layout: &ChannelLayout,
    slice: ChannelSlice,
) -> Result<(), TensorError> {
    const OP: &str = "merge_channel_slice";
    let slice_bits = layout.channel_bits(slice.channels);
    let start = slice.index * slice_bits;
    let end = start + slice_bits;
    layout.check_pixel_bits(OP, end)?;
    layout.check_map(OP, dst, slice.dim)?;
    layout.check_map(OP, src, slice.dim)?;

    let stride = layout.pixel_stride();
    let residual_end = crate::pad_to(end, WORD_BITS).min(stride * 8);
    for pixel in 0..slice.pixels() {
        let base = pixel * stride;
        let dst_px = &mut dst[base..base + stride];
        if slice_bits % WORD_BITS != 0 {
            clear_bits(dst_px, end, residual_end - end)?;
        }
        bit_copy(dst_px, start, &src[base..base + stride], 0, slice_bits)?;
    }
    Ok(())
}
