// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Iteration concat: append one pass's output channels per pixel.

use super::bit_copy;
use crate::{ChannelLayout, ChannelSlice, TensorError};

/// For every pixel, writes the first `slice.channels` channels of `src`
/// (one iteration's output) into `dst` at channel offset
/// `slice.index × slice.channels`.
///
/// # Errors
/// Returns [`TensorError::InvalidGeometry`] if the iteration slot lies
/// outside the pixel, or [`TensorError::BufferTooSmall`] if either map is
/// short.
pub fn concat_iteration_slice(
    dst: &mut [u8],
    src: &[u8],
    layout: &ChannelLayout,
    slice: ChannelSlice,
) -> Result<(), TensorError> {
    const OP: &str = "concat_iteration_slice";
    let slice_bits = layout.channel_bits(slice.channels);
    layout.check_pixel_bits(OP, slice_bits * (slice.index + 1))?;
    layout.check_map(OP, dst, slice.dim)?;
    layout.check_map(OP, src, slice.dim)?;

    let stride = layout.pixel_stride();
    for pixel in 0..slice.pixels() {
        let base = pixel * stride;
        bit_copy(
            &mut dst[base..base + stride],
            slice.index * slice_bits,
            &src[base..base + stride],
            0,
            slice_bits,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_two_iterations() {
        // 2-bit activations, 5 channels per iteration (10 bits).
        let layout = ChannelLayout::new(2, 8);
        let first = [0xFFu8, 0x03, 0, 0, 0, 0, 0, 0];
        let second = [0x0Fu8, 0x02, 0, 0, 0, 0, 0, 0];
        let mut dst = [0u8; 8];

        concat_iteration_slice(&mut dst, &first, &layout, ChannelSlice::new(5, 1, 0)).unwrap();
        concat_iteration_slice(&mut dst, &second, &layout, ChannelSlice::new(5, 1, 1)).unwrap();

        let px = u32::from_le_bytes([dst[0], dst[1], dst[2], dst[3]]);
        assert_eq!(px & 0x3FF, 0x3FF);
        assert_eq!((px >> 10) & 0x3FF, 0x20F);
        assert_eq!(px >> 20, 0);
    }

    #[test]
    fn test_concat_overflowing_pixel() {
        let layout = ChannelLayout::new(2, 8);
        let src = [0u8; 8];
        let mut dst = [0u8; 8];
        let err = concat_iteration_slice(&mut dst, &src, &layout, ChannelSlice::new(20, 1, 1));
        assert!(matches!(err, Err(TensorError::InvalidGeometry { .. })));
    }
}
