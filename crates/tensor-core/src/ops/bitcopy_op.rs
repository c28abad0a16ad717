// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Arbitrary-offset bit copy.
//!
//! Buffers are viewed as little-endian 64-bit words, so bit `n` of a buffer
//! is bit `n % 64` of word `n / 64`. A copy is split into three phases:
//!
//! ```text
//!  dst: │ head (partial word) │ body (whole words) … │ tail (partial word) │
//! ```
//!
//! The head brings the destination cursor onto a word boundary, the body
//! writes whole destination words and the tail finishes the remaining bits.
//! Source words are composed from two neighbouring words whenever the
//! source cursor is not aligned. Bits outside the destination range are
//! never modified.

use crate::TensorError;

const WORD_BITS: usize = 64;
const WORD_BYTES: usize = 8;

/// Copies `bits` bits from `src` (starting at bit `src_offset`) into `dst`
/// (starting at bit `dst_offset`).
///
/// Works for any offsets and any length, including zero and lengths that
/// span many words.
///
/// # Errors
/// Returns [`TensorError::BitRangeOutOfBounds`] if either range extends past
/// the end of its buffer.
pub fn bit_copy(
    dst: &mut [u8],
    dst_offset: usize,
    src: &[u8],
    src_offset: usize,
    bits: usize,
) -> Result<(), TensorError> {
    check_range("bit_copy", dst.len(), dst_offset, bits)?;
    check_range("bit_copy", src.len(), src_offset, bits)?;
    if bits == 0 {
        return Ok(());
    }

    let mut copied = 0;

    // Head.
    let head_shift = dst_offset % WORD_BITS;
    if head_shift != 0 {
        let count = (WORD_BITS - head_shift).min(bits);
        let value = read_bits(src, src_offset, count);
        store_word_masked(
            dst,
            dst_offset / WORD_BITS,
            value << head_shift,
            low_mask(count) << head_shift,
        );
        copied = count;
    }

    // Body.
    let body_words = (bits - copied) / WORD_BITS;
    if body_words > 0 {
        let src_cursor = src_offset + copied;
        let dst_word = (dst_offset + copied) / WORD_BITS;
        if src_cursor % WORD_BITS == 0 {
            let from = src_cursor / 8;
            let to = dst_word * WORD_BYTES;
            let len = body_words * WORD_BYTES;
            dst[to..to + len].copy_from_slice(&src[from..from + len]);
        } else {
            for w in 0..body_words {
                let value = read_bits(src, src_cursor + w * WORD_BITS, WORD_BITS);
                store_word_masked(dst, dst_word + w, value, u64::MAX);
            }
        }
        copied += body_words * WORD_BITS;
    }

    // Tail.
    if copied < bits {
        let count = bits - copied;
        let value = read_bits(src, src_offset + copied, count);
        store_word_masked(dst, (dst_offset + copied) / WORD_BITS, value, low_mask(count));
    }

    Ok(())
}

/// Clears `bits` bits of `dst` starting at bit `offset`.
///
/// # Errors
/// Returns [`TensorError::BitRangeOutOfBounds`] if the range extends past
/// the end of `dst`.
pub fn clear_bits(dst: &mut [u8], offset: usize, bits: usize) -> Result<(), TensorError> {
    check_range("clear_bits", dst.len(), offset, bits)?;
    let mut cursor = offset;
    let end = offset + bits;
    while cursor < end {
        let shift = cursor % WORD_BITS;
        let count = (WORD_BITS - shift).min(end - cursor);
        store_word_masked(dst, cursor / WORD_BITS, 0, low_mask(count) << shift);
        cursor += count;
    }
    Ok(())
}

fn check_range(
    op: &'static str,
    len_bytes: usize,
    offset: usize,
    bits: usize,
) -> Result<(), TensorError> {
    let available_bits = len_bytes * 8;
    match offset.checked_add(bits) {
        Some(end) if end <= available_bits => Ok(()),
        end => Err(TensorError::BitRangeOutOfBounds {
            op,
            offset,
            end: end.unwrap_or(usize::MAX),
            available_bits,
        }),
    }
}

fn low_mask(bits: usize) -> u64 {
    if bits >= WORD_BITS {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Loads word `word` of `buf`; bytes past the end of the buffer read as zero.
fn load_word(buf: &[u8], word: usize) -> u64 {
    let start = word * WORD_BYTES;
    let mut bytes = [0u8; WORD_BYTES];
    if start < buf.len() {
        let end = (start + WORD_BYTES).min(buf.len());
        bytes[..end - start].copy_from_slice(&buf[start..end]);
    }
    u64::from_le_bytes(bytes)
}

/// Writes the bits of `value` selected by `mask` into word `word` of `buf`.
/// Bytes past the end of the buffer are skipped.
fn store_word_masked(buf: &mut [u8], word: usize, value: u64, mask: u64) {
    let start = word * WORD_BYTES;
    if start >= buf.len() {
        return;
    }
    let end = (start + WORD_BYTES).min(buf.len());
    let merged = (load_word(buf, word) & !mask) | (value & mask);
    buf[start..end].copy_from_slice(&merged.to_le_bytes()[..end - start]);
}

/// Reads `count` (at most 64) bits starting at bit `offset`.
fn read_bits(src: &[u8], offset: usize, count: usize) -> u64 {
    let word = offset / WORD_BITS;
    let shift = offset % WORD_BITS;
    let mut value = load_word(src, word) >> shift;
    if shift != 0 && shift + count > WORD_BITS {
        value |= load_word(src, word + 1) << (WORD_BITS - shift);
    }
    value & low_mask(count)
}
