// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise zero-pad / truncate between two packed buffers.

use super::bit_copy;
use crate::TensorError;

/// Repacks `src` into `dst`, treating both as `elements` equal-width
/// elements.
///
/// Element widths are `len × 8 / elements` bits. The overlapping prefix of
/// every element is copied; the rest of each destination element is zero.
/// Used when an externally supplied image does not match the padded
/// internal tensor size (or vice versa for results).
///
/// # Errors
/// Returns [`TensorError::ZeroElements`] if `elements` is zero.
pub fn pad_or_truncate(dst: &mut [u8], src: &[u8], elements: usize) -> Result<(), TensorError> {
    if elements == 0 {
        return Err(TensorError::ZeroElements {
            op: "pad_or_truncate",
        });
    }

    let src_element_bits = src.len() * 8 / elements;
    let dst_element_bits = dst.len() * 8 / elements;
    let copy_bits = src_element_bits.min(dst_element_bits);

    dst.fill(0);
    for i in 0..elements {
        bit_copy(dst, i * dst_element_bits, src, i * src_element_bits, copy_bits)?;
    }
    Ok(())
}
