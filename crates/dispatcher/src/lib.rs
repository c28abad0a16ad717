// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # dispatcher
//!
//! Runs one layer at a time on the quantized-network accelerator.
//!
//! This crate provides:
//! - [`Dispatcher`]: the two-phase dispatch interface (program, start,
//!   poll, sync) shared by both backends.
//! - [`HardwareBackend`]: the register protocol over a memory-mapped
//!   window ([`RegisterWindow`]) with DMA memory from a udmabuf region
//!   ([`DmaAllocator`]).
//! - [`SoftwareBackend`]: the same protocol computed on the CPU by
//!   [`reference::run_layer`].
//! - [`select_backend`]: runtime backend selection.
//! - [`regs`]: the accelerator's register map.

mod backend;
mod backends;
mod banks;
mod config;
mod dma;
mod error;
mod mmio;
pub mod reference;
pub mod regs;

pub use backend::{select_backend, BackendKind, Dispatcher};
pub use backends::{HardwareBackend, SoftwareBackend};
pub use banks::WeightBanks;
pub use config::DeviceConfig;
pub use dma::{DmaAllocator, DmaBlock};
pub use error::DispatchError;
pub use mmio::{RegisterBus, RegisterWindow};

#[cfg(test)]
pub(crate) mod tests {
    use model_ir::{HardwareConfig, HardwareLayerType, LayerDescriptor, LayerKind};

    pub(crate) const NETWORK_JSON: &str = r#"{
        "parameters": {
            "MAX_K": 3, "MAX_IFM_CH": 64, "MAX_IFM_DIM": 16,
            "MAX_OFM_CH": 64, "MAX_OFM_DIM": 16,
            "MAX_POOL_SIZE": 2, "MAX_POOL_STRIDE": 2,
            "MAX_SIMD": 8, "MAX_PE_CONV": 4, "MAX_PE_FC": 2, "MEM_CHANNELS": 2,
            "ACTIVATION_BITS": 2, "WEIGHTS_BITS": 1, "THRESHOLDS_BITS": 64,
            "MACC_BITS": 16, "DATAWIDTH": 64
        }
    }"#;

    pub(crate) fn small_hw() -> HardwareConfig {
        HardwareConfig::from_json(NETWORK_JSON).unwrap()
    }

    /// Stride-1 "same" convolution on a `dim × dim` map.
    pub(crate) fn conv_layer(kernel: usize, in_ch: usize, out_ch: usize, dim: usize) -> LayerDescriptor {
        let hw = small_hw();
        let mut l = LayerDescriptor::new(0, "conv_layer");
        l.kind = LayerKind::CONV;
        l.hw_type = HardwareLayerType::Conv;
        l.kernel_dim = kernel;
        l.stride = 1;
        l.ifm_ch = in_ch;
        l.ifm_dim = dim;
        l.ofm_ch = out_ch;
        l.ofm_dim = dim;
        l.padding = kernel / 2;
        l.padded_dim = dim + 2 * l.padding;
        l.pool_in_dim = dim;
        l.pool_out_dim = dim;
        l.conv_w_mem = hw.conv_weight_words(kernel);
        l.conv_t_mem = hw.conv_threshold_entries();
        l.conv_mem_bits = hw.datawidth
            * hw.max_pe_conv
            * (l.conv_w_mem + l.conv_t_mem * hw.threshold_words());
        l.conv_mem = l.conv_mem_bits / hw.mem_channels / 8;
        l.in_ch = in_ch;
        l.in_dim = dim;
        l.out_ch = out_ch;
        l.out_dim = dim;
        l.in_size = hw.map_bytes(dim);
        l.out_size = hw.map_bytes(dim);
        l
    }
}
