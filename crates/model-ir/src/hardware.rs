// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Accelerator capacity constants.
//!
//! The network description document carries the synthesis-time limits of
//! the accelerator under a `parameters` object:
//!
//! ```json
//! {
//!   "parameters": {
//!     "MAX_K": 5, "MAX_IFM_CH": 384, "MAX_IFM_DIM": 64,
//!     "MAX_OFM_CH": 384, "MAX_OFM_DIM": 64,
//!     "MAX_POOL_SIZE": 3, "MAX_POOL_STRIDE": 2,
//!     "MAX_SIMD": 64, "MAX_PE_CONV": 32, "MAX_PE_FC": 2, "MEM_CHANNELS": 2,
//!     "ACTIVATION_BITS": 2, "WEIGHTS_BITS": 1, "THRESHOLDS_BITS": 64,
//!     "MACC_BITS": 16, "DATAWIDTH": 64
//!   }
//! }
//! ```
//!
//! Every field is required. The values never change after load and are
//! shared read-only by every other component.

use crate::ModelError;
use std::path::Path;
use tensor_core::{pad_to, ChannelLayout};

/// Synthesis-time limits of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HardwareConfig {
    /// Largest supported convolution kernel.
    pub max_k: usize,
    pub max_ifm_ch: usize,
    pub max_ifm_dim: usize,
    pub max_ofm_ch: usize,
    pub max_ofm_dim: usize,
    pub max_pool_size: usize,
    pub max_pool_stride: usize,
    /// Input channels consumed per cycle by one processing element.
    pub max_simd: usize,
    /// Processing elements of the convolution datapath.
    pub max_pe_conv: usize,
    pub max_pe_fc: usize,
    /// Number of weight memory channels (one address register pair each).
    pub mem_channels: usize,
    pub activation_bits: usize,
    pub weights_bits: usize,
    /// Width of one threshold entry (all levels plus the invert flag).
    pub thresholds_bits: usize,
    pub macc_bits: usize,
    /// Width of one datapath word in bits.
    pub datawidth: usize,
}

#[derive(serde::Deserialize)]
struct NetworkDocument {
    parameters: HardwareConfig,
}

impl HardwareConfig {
    /// Loads and validates the capacities from a network description file.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses and validates the capacities from a network description string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let doc: NetworkDocument = serde_json::from_str(json)?;
        doc.parameters.validate()?;
        Ok(doc.parameters)
    }

    /// Checks the values the runtime divides by or maps onto registers.
    pub fn validate(&self) -> Result<(), ModelError> {
        let fields: [(&'static str, usize); 16] = [
            ("MAX_K", self.max_k),
            ("MAX_IFM_CH", self.max_ifm_ch),
            ("MAX_IFM_DIM", self.max_ifm_dim),
            ("MAX_OFM_CH", self.max_ofm_ch),
            ("MAX_OFM_DIM", self.max_ofm_dim),
            ("MAX_POOL_SIZE", self.max_pool_size),
            ("MAX_POOL_STRIDE", self.max_pool_stride),
            ("MAX_SIMD", self.max_simd),
            ("MAX_PE_CONV", self.max_pe_conv),
            ("MAX_PE_FC", self.max_pe_fc),
            ("MEM_CHANNELS", self.mem_channels),
            ("ACTIVATION_BITS", self.activation_bits),
            ("WEIGHTS_BITS", self.weights_bits),
            ("THRESHOLDS_BITS", self.thresholds_bits),
            ("MACC_BITS", self.macc_bits),
            ("DATAWIDTH", self.datawidth),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ModelError::InvalidConfig {
                    field,
                    detail: "must be non-zero".into(),
                });
            }
        }

        if self.datawidth % 8 != 0 {
            return Err(ModelError::InvalidConfig {
                field: "DATAWIDTH",
                detail: format!("{} is not a whole number of bytes", self.datawidth),
            });
        }
        if self.mem_channels > 2 {
            return Err(ModelError::InvalidConfig {
                field: "MEM_CHANNELS",
                detail: format!("{} channels, the register map has two", self.mem_channels),
            });
        }
        if self.max_pe_conv % self.mem_channels != 0 {
            return Err(ModelError::InvalidConfig {
                field: "MAX_PE_CONV",
                detail: format!(
                    "{} PEs cannot be spread over {} memory channels",
                    self.max_pe_conv, self.mem_channels
                ),
            });
        }
        if self.activation_bits > 16 || self.weights_bits > 32 {
            return Err(ModelError::InvalidConfig {
                field: "ACTIVATION_BITS",
                detail: format!(
                    "{}-bit activations with {}-bit weights are not supported",
                    self.activation_bits, self.weights_bits
                ),
            });
        }
        Ok(())
    }

    /// Word alignment granularity in bytes.
    pub fn word_bytes(&self) -> usize {
        self.datawidth / 8
    }

    /// Packing of one feature map pixel, sized for `MAX_IFM_CH` channels.
    pub fn channel_layout(&self) -> ChannelLayout {
        ChannelLayout::for_capacity(self.activation_bits, self.max_ifm_ch, self.word_bytes())
    }

    /// Bytes of a `dim × dim` feature map.
    pub fn map_bytes(&self, dim: usize) -> usize {
        self.channel_layout().map_bytes(dim)
    }

    /// Bytes of a `dim × dim` map rounded up to the word granularity.
    pub fn padded_map_bytes(&self, dim: usize) -> usize {
        pad_to(self.map_bytes(dim), self.word_bytes())
    }

    /// Processing elements whose weights live in one memory channel.
    pub fn pe_per_channel(&self) -> usize {
        self.max_pe_conv / self.mem_channels
    }

    /// Datapath words per threshold entry.
    pub fn threshold_words(&self) -> usize {
        self.thresholds_bits.div_ceil(self.datawidth)
    }

    /// Weight words per PE for a `kernel × kernel` convolution.
    pub fn conv_weight_words(&self, kernel: usize) -> usize {
        (kernel * kernel * self.max_ofm_ch * self.max_ifm_ch) / (self.max_pe_conv * self.max_simd)
    }

    /// Threshold entries per PE.
    pub fn conv_threshold_entries(&self) -> usize {
        self.max_ofm_ch / self.max_pe_conv
    }
}

impl std::fmt::Display for HardwareConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "kernel ≤ {}, IFM {}ch × {}px, OFM {}ch × {}px, pool {}/{}",
            self.max_k,
            self.max_ifm_ch,
            self.max_ifm_dim,
            self.max_ofm_ch,
            self.max_ofm_dim,
            self.max_pool_size,
            self.max_pool_stride,
        )?;
        writeln!(
            f,
            "SIMD {}, PE conv {} / fc {}, {} memory channel(s)",
            self.max_simd, self.max_pe_conv, self.max_pe_fc, self.mem_channels,
        )?;
        write!(
            f,
            "W{}A{}, thresholds {} bit, MACC {} bit, datapath {} bit",
            self.weights_bits,
            self.activation_bits,
            self.thresholds_bits,
            self.macc_bits,
            self.datawidth,
        )
    }
}
