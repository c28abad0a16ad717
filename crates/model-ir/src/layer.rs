// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Effective layer descriptors.
//!
//! A [`LayerDescriptor`] is one step the runtime executes: a convolution
//! (possibly with its max-pool folded in), a fully-connected layer, or a
//! split/merge marker that steers the channel bookkeeping between them.
//! All geometry the dispatcher writes to the accelerator is precomputed
//! here, once, at load time.

use std::fmt;

/// Bitmask of what a descriptor does. Kinds combine: a convolution with a
/// folded max-pool is `CONV | MAX_POOL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LayerKind(u32);

impl LayerKind {
    pub const NONE: Self = Self(0);
    pub const CONV: Self = Self(1);
    pub const MAX_POOL: Self = Self(2);
    pub const SPLIT: Self = Self(4);
    pub const MERGE: Self = Self(8);
    pub const FC: Self = Self(16);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if any bit of `other` is set in `self`.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Convolution or fully-connected: the kinds that run on the accelerator.
    pub const fn is_compute(self) -> bool {
        self.intersects(Self(Self::CONV.0 | Self::FC.0))
    }
}

impl std::ops::BitOr for LayerKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for LayerKind {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }
        let names = [
            (Self::SPLIT, "split"),
            (Self::MERGE, "merge"),
            (Self::CONV, "conv"),
            (Self::MAX_POOL, "max_pool"),
            (Self::FC, "fc"),
        ];
        let mut first = true;
        for (kind, name) in names {
            if self.contains(kind) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Layer type code written to the accelerator's type register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareLayerType {
    Fc,
    #[default]
    Conv,
    ConvPool,
}

impl HardwareLayerType {
    pub const fn code(self) -> u32 {
        match self {
            Self::Fc => 0,
            Self::Conv => 1,
            Self::ConvPool => 2,
        }
    }
}

/// One effective layer with every derived quantity filled in.
///
/// Field groups:
/// - `ifm_*`/`ofm_*`: the convolution itself (per iteration for `ofm_ch`);
/// - `in_*`/`out_*`: what the descriptor consumes and produces, after any
///   folded pool;
/// - `conv_*`: weight memory footprint of one instance;
/// - `weight_index`, `slice_weight_stride`, `iterations`, `split`, `merge`:
///   bookkeeping for folded and split layers.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerDescriptor {
    /// Index of the originating record in the layer document.
    pub record: usize,
    /// Record function (`conv_layer`, `split_layer`, ...).
    pub function: String,
    pub kind: LayerKind,
    pub hw_type: HardwareLayerType,

    pub kernel_dim: usize,
    pub stride: usize,
    pub log2_stride: usize,
    pub ifm_ch: usize,
    pub ifm_dim: usize,
    pub ofm_ch: usize,
    pub ofm_dim: usize,
    pub padding: usize,
    pub padded_dim: usize,

    pub pool_in_dim: usize,
    pub pool_out_dim: usize,
    /// Pool stride as log2.
    pub pool_stride: usize,

    /// Weight words per PE.
    pub conv_w_mem: usize,
    /// Threshold entries per PE.
    pub conv_t_mem: usize,
    pub conv_mem_bits: usize,
    /// Bytes of one weight bank (per memory channel).
    pub conv_mem: usize,

    pub in_ch: usize,
    pub in_dim: usize,
    pub out_ch: usize,
    pub out_dim: usize,
    pub in_size: usize,
    pub out_size: usize,

    /// True while inside a split region.
    pub in_split: bool,
    /// First weight bank of a compute layer. On a merge: number of compute
    /// layers in the split region it closes.
    pub weight_index: usize,
    /// Distance between the banks of consecutive split slices.
    pub slice_weight_stride: usize,
    pub iterations: usize,
    pub split: usize,
    pub merge: usize,
}

impl LayerDescriptor {
    /// Creates an empty descriptor of kind `NONE` for record `record`.
    pub fn new(record: usize, function: &str) -> Self {
        Self {
            record,
            function: function.to_string(),
            kind: LayerKind::NONE,
            hw_type: HardwareLayerType::Conv,
            kernel_dim: 0,
            stride: 0,
            log2_stride: 0,
            ifm_ch: 0,
            ifm_dim: 0,
            ofm_ch: 0,
            ofm_dim: 0,
            padding: 0,
            padded_dim: 0,
            pool_in_dim: 0,
            pool_out_dim: 0,
            pool_stride: 0,
            conv_w_mem: 0,
            conv_t_mem: 0,
            conv_mem_bits: 0,
            conv_mem: 0,
            in_ch: 0,
            in_dim: 0,
            out_ch: 0,
            out_dim: 0,
            in_size: 0,
            out_size: 0,
            in_split: false,
            weight_index: 0,
            slice_weight_stride: 1,
            iterations: 1,
            split: 1,
            merge: 1,
        }
    }

    /// Weight instances the loader installs: one per split slice inside a
    /// split region, otherwise one per iteration.
    pub fn weight_instances(&self) -> usize {
        if self.in_split {
            self.split
        } else {
            self.iterations
        }
    }

    /// Bank holding instance `instance` of this layer's weights.
    pub fn weight_bank(&self, instance: usize) -> usize {
        self.weight_index + instance * self.slice_weight_stride
    }

    /// Output channels after concatenating all iterations.
    pub fn total_out_ch(&self) -> usize {
        self.out_ch * self.iterations
    }

    /// Returns a concise summary string for display.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "#{:<3} {:<13} in {}ch×{} → out {}ch×{}",
            self.record, self.kind, self.in_ch, self.in_dim, self.out_ch, self.out_dim,
        );
        if self.kind.is_compute() {
            s.push_str(&format!(
                ", k{} s{} pad {}, bank {}",
                self.kernel_dim, self.stride, self.padding, self.weight_index
            ));
        }
        if self.iterations > 1 {
            s.push_str(&format!(", {} iterations", self.iterations));
        }
        if self.kind.contains(LayerKind::SPLIT) || (self.in_split && self.split > 1) {
            s.push_str(&format!(", split {}", self.split));
        }
        if self.kind.contains(LayerKind::MERGE) {
            s.push_str(&format!(", merge {}", self.merge));
        }
        s
    }
}
