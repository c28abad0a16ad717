// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Output verification against a golden feature map.

use crate::{ChannelLayout, TensorError};

/// Result of comparing a computed map with a golden map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct VerifyReport {
    /// Pixels compared.
    pub pixels: usize,
    /// Pixels whose channel data differs.
    pub mismatched_pixels: usize,
}

impl VerifyReport {
    /// `true` if every compared pixel matched.
    pub fn passed(&self) -> bool {
        self.mismatched_pixels == 0
    }
}

/// Compares the first `out_channels` channels of every pixel of a
/// `out_dim × out_dim` map. Inter-pixel padding is ignored.
///
/// # Errors
/// Returns [`TensorError::BufferTooSmall`] if either map is short, or
/// [`TensorError::InvalidGeometry`] if the channels do not fit a pixel.
pub fn verify(
    golden: &[u8],
    candidate: &[u8],
    layout: &ChannelLayout,
    out_channels: usize,
    out_dim: usize,
) -> Result<VerifyReport, TensorError> {
    const OP: &str = "verify";
    let bits = layout.channel_bits(out_channels);
    layout.check_pixel_bits(OP, bits)?;
    layout.check_map(OP, golden, out_dim)?;
    layout.check_map(OP, candidate, out_dim)?;

    let stride = layout.pixel_stride();
    let full_bytes = bits / 8;
    let tail_mask = ((1u16 << (bits % 8)) - 1) as u8;

    let mut report = VerifyReport {
        pixels: out_dim * out_dim,
        mismatched_pixels: 0,
    };
    for pixel in 0..report.pixels {
        let base = pixel * stride;
        let g = &golden[base..base + stride];
        let c = &candidate[base..base + stride];
        let mut equal = g[..full_bytes] == c[..full_bytes];
        if tail_mask != 0 {
            equal &= (g[full_bytes] & tail_mask) == (c[full_bytes] & tail_mask);
        }
        if !equal {
            report.mismatched_pixels += 1;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_maps_pass() {
        let layout = ChannelLayout::new(2, 8);
        let map: Vec<u8> = (0..32).collect();
        let report = verify(&map, &map, &layout, 16, 2).unwrap();
        assert!(report.passed());
        assert_eq!(report.pixels, 4);
    }

    #[test]
    fn test_padding_differences_ignored() {
        let layout = ChannelLayout::new(2, 8);
        let golden = vec![0u8; 16];
        let mut candidate = vec![0u8; 16];
        // 5 channels → 10 bits; bit 10 and later bytes are padding.
        candidate[1] = 0b1111_1100;
        candidate[7] = 0xFF;
        let report = verify(&golden, &candidate, &layout, 5, 1).unwrap();
        assert!(report.passed());
    }

    #[test]
    fn test_counts_mismatched_pixels() {
        let layout = ChannelLayout::new(2, 8);
        let golden = vec![0u8; 32];
        let mut candidate = vec![0u8; 32];
        candidate[0] = 1;
        candidate[8 * 3 + 1] = 0x02;
        let report = verify(&golden, &candidate, &layout, 5, 2).unwrap();
        assert_eq!(report.mismatched_pixels, 2);
        assert!(!report.passed());
    }
}
