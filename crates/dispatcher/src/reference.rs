// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bit-exact reference computation of one accelerator layer.
//!
//! Computes what the accelerator computes for a conv, conv+pool or fc
//! descriptor: a quantized convolution followed by multi-level
//! thresholding, then an optional max-pool over the thresholded map.
//!
//! # Weight bank layout
//!
//! Output channel `oc` is computed by PE `p = oc % MAX_PE_CONV` in fold
//! `f = oc / MAX_PE_CONV`. PE `p` lives in memory channel
//! `p / pe_per_channel` at local index `pe = p % pe_per_channel`.
//! Within a channel's block (64-bit little-endian words):
//!
//! ```text
//!  word 0                     pe_per_channel·conv_w_mem
//!  │ pe 0 weights │ pe 1 … │  │ pe 0 thresholds │ pe 1 … │
//!  └ conv_w_mem words each ┘  └ conv_t_mem · shift words ┘
//! ```
//!
//! Weight `(oc, ky, kx, ic)` is `WEIGHTS_BITS` wide at bit
//! `((f·K² + ky·K + kx)·ifm_ch_simd + ic)·WEIGHTS_BITS` of its PE's weight
//! words, where `ifm_ch_simd` is `ifm_ch` rounded up to `MAX_SIMD`. One-bit
//! weights encode −1/+1; wider weights are two's complement.
//!
//! The threshold entry of fold `f` starts at word
//! `((pe·conv_t_mem) + f)·shift`. It holds `2^A − 1` signed thresholds of
//! `THRESHOLDS_BITS / 2^A` bits each, followed by an invert bit. The output
//! activation is the number of thresholds the accumulator reaches, with all
//! `A` bits flipped when the invert bit is set.
//!
//! Bits that fall outside a block, or blocks that are missing, read as zero.

use crate::DispatchError;
use memory_manager::DeviceMemory;
use model_ir::{HardwareConfig, LayerDescriptor, LayerKind};
use tensor_core::{bit_copy, pad_to};

const WORD_BITS: usize = 64;

/// Reads `bits` (≤ 64) bits at bit `offset` of `src`; zero when out of range.
fn read_bits(src: &[u8], offset: usize, bits: usize) -> u64 {
    if bits == 0 || offset + bits > src.len() * 8 {
        return 0;
    }
    let mut word = [0u8; 8];
    match bit_copy(&mut word, 0, src, offset, bits) {
        Ok(()) => u64::from_le_bytes(word),
        Err(_) => 0,
    }
}

fn sign_extend(value: u64, bits: usize) -> i64 {
    if bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Weight and threshold reader over one bank.
struct BankView<'a> {
    hw: &'a HardwareConfig,
    channels: &'a [Box<dyn DeviceMemory>],
    kernel: usize,
    conv_w_mem: usize,
    conv_t_mem: usize,
    ifm_ch_simd: usize,
}

impl BankView<'_> {
    /// `(channel block, local pe, fold)` of output channel `oc`.
    fn locate(&self, oc: usize) -> (Option<&[u8]>, usize, usize) {
        let p = oc % self.hw.max_pe_conv;
        let fold = oc / self.hw.max_pe_conv;
        let ppc = self.hw.pe_per_channel();
        let block = self.channels.get(p / ppc).map(|m| m.as_slice());
        (block, p % ppc, fold)
    }

    fn weight(&self, oc: usize, ky: usize, kx: usize, ic: usize) -> i64 {
        let (block, pe, fold) = self.locate(oc);
        let Some(block) = block else {
            return self.decode_weight(0);
        };
        let wbits = self.hw.weights_bits;
        let index = (fold * self.kernel * self.kernel + ky * self.kernel + kx) * self.ifm_ch_simd + ic;
        let pe_bits = self.conv_w_mem * WORD_BITS;
        let local = index * wbits;
        let raw = if local + wbits <= pe_bits {
            read_bits(block, pe * pe_bits + local, wbits)
        } else {
            0
        };
        self.decode_weight(raw)
    }

    fn decode_weight(&self, raw: u64) -> i64 {
        if self.hw.weights_bits == 1 {
            if raw & 1 == 1 {
                1
            } else {
                -1
            }
        } else {
            sign_extend(raw, self.hw.weights_bits)
        }
    }

    /// Thresholds (ascending index) and invert flag for output channel `oc`.
    fn thresholds(&self, oc: usize, levels: usize) -> (Vec<i64>, bool) {
        let (block, pe, fold) = self.locate(oc);
        let Some(block) = block else {
            return (vec![0; levels], false);
        };
        let shift = self.hw.threshold_words();
        let base_word = self.hw.pe_per_channel() * self.conv_w_mem;
        let entry_word = base_word + (pe * self.conv_t_mem + fold) * shift;
        let entry_bit = entry_word * WORD_BITS;
        let tp = self.hw.thresholds_bits / (levels + 1);

        let thresholds = (0..levels)
            .map(|t| sign_extend(read_bits(block, entry_bit + t * tp, tp.min(64)), tp.min(64)))
            .collect();
        let invert = read_bits(block, entry_bit + tp * levels, 1) == 1;
        (thresholds, invert)
    }
}

/// Runs `layer` on `input`, writing the packed result into `output`.
///
/// `bank` is the weight bank loaded for this layer (one block per memory
/// channel); `None` behaves like all-zero weight memory.
pub fn run_layer(
    hw: &HardwareConfig,
    layer: &LayerDescriptor,
    bank: Option<&[Box<dyn DeviceMemory>]>,
    input: &[u8],
    output: &mut [u8],
) -> Result<(), DispatchError> {
    let layout = hw.channel_layout();
    let stride_bytes = layout.pixel_stride();
    let act = hw.activation_bits;
    let levels = (1usize << act) - 1;
    let act_mask = levels as u64;

    let in_bytes = layout.map_bytes(layer.ifm_dim);
    if input.len() < in_bytes {
        return Err(DispatchError::BufferTooSmall {
            what: "layer input",
            expected: in_bytes,
            actual: input.len(),
        });
    }
    let out_bytes = layout.map_bytes(layer.out_dim);
    if output.len() < out_bytes {
        return Err(DispatchError::BufferTooSmall {
            what: "layer output",
            expected: out_bytes,
            actual: output.len(),
        });
    }

    let view = BankView {
        hw,
        channels: bank.unwrap_or(&[]),
        kernel: layer.kernel_dim,
        conv_w_mem: layer.conv_w_mem,
        conv_t_mem: layer.conv_t_mem,
        ifm_ch_simd: pad_to(layer.ifm_ch, hw.max_simd),
    };

    let thresholds: Vec<(Vec<i64>, bool)> =
        (0..layer.ofm_ch).map(|oc| view.thresholds(oc, levels)).collect();

    // Convolution and thresholding over the full conv output map.
    let conv_dim = layer.ofm_dim;
    let mut conv = vec![0u8; conv_dim * conv_dim * layer.ofm_ch];
    let pad = layer.padding as isize;
    for oy in 0..conv_dim {
        for ox in 0..conv_dim {
            for (oc, (thr, invert)) in thresholds.iter().enumerate() {
                let mut acc: i64 = 0;
                for ky in 0..layer.kernel_dim {
                    let iy = (oy * layer.stride + ky) as isize - pad;
                    if iy < 0 || iy >= layer.ifm_dim as isize {
                        continue;
                    }
                    for kx in 0..layer.kernel_dim {
                        let ix = (ox * layer.stride + kx) as isize - pad;
                        if ix < 0 || ix >= layer.ifm_dim as isize {
                            continue;
                        }
                        let pixel = (iy as usize * layer.ifm_dim + ix as usize) * stride_bytes * 8;
                        for ic in 0..layer.ifm_ch {
                            let a = read_bits(input, pixel + ic * act, act) as i64;
                            if a != 0 {
                                acc += a * view.weight(oc, ky, kx, ic);
                            }
                        }
                    }
                }
                let mut level = thr.iter().filter(|&&t| acc >= t).count() as u64;
                if *invert {
                    level ^= act_mask;
                }
                conv[(oy * conv_dim + ox) * layer.ofm_ch + oc] = level as u8;
            }
        }
    }

    output[..out_bytes].fill(0);
    let pooled = layer.kind.contains(LayerKind::MAX_POOL);
    let pool_step = 1usize << layer.pool_stride;
    let window = if pooled {
        layer
            .pool_in_dim
            .saturating_sub(layer.pool_out_dim.saturating_sub(1) * pool_step)
            .max(1)
    } else {
        1
    };
    let step = if pooled { pool_step } else { 1 };

    for oy in 0..layer.out_dim {
        for ox in 0..layer.out_dim {
            let pixel = (oy * layer.out_dim + ox) * stride_bytes * 8;
            for oc in 0..layer.ofm_ch {
                let mut best = 0u8;
                for wy in 0..window {
                    for wx in 0..window {
                        let (y, x) = (oy * step + wy, ox * step + wx);
                        if y < conv_dim && x < conv_dim {
                            best = best.max(conv[(y * conv_dim + x) * layer.ofm_ch + oc]);
                        }
                    }
                }
                let bytes = (best as u64).to_le_bytes();
                bit_copy(output, pixel + oc * act, &bytes, 0, act)?;
            }
        }
    }
    Ok(())
}
