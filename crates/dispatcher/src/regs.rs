// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Accelerator control register map.
//!
//! Byte offsets from the register base. All registers are 32 bits wide;
//! 64-bit addresses occupy two consecutive registers, low word first.
//!
//! ```text
//! 0x00  CTRL          write 1 = go, bit 1 = done
//! 0x10  IN_ADDR       input (compute) / weight bank 0 (init), 64-bit
//! 0x1c  WEIGHTS1_ADDR weight bank 1, 64-bit
//! 0x28  OUT_ADDR      output, 64-bit
//! 0x34  DO_INIT       1 = load weights, 0 = compute
//! 0x3c  LAYER_TYPE    0 fc, 1 conv, 2 conv+pool
//! 0x44  KERNEL_DIM
//! 0x4c  LOG2_STRIDE
//! 0x54  IFM_CH
//! 0x5c  OFM_CH
//! 0x64  IFM_DIM
//! 0x6c  PADDED_DIM
//! 0x74  OFM_DIM
//! 0x7c  POOL_IN_DIM
//! 0x84  POOL_OUT_DIM
//! 0x8c  POOL_STRIDE   log2
//! ```

/// Physical base of the register window.
pub const REGISTER_BASE: u64 = 0xA000_0000;
/// Size of the register window.
pub const REGISTER_SPAN: usize = 0x1_0000;

pub const CTRL: usize = 0x00;
pub const IN_ADDR: usize = 0x10;
/// Weight bank 0 shares the input address register.
pub const WEIGHTS0_ADDR: usize = IN_ADDR;
pub const WEIGHTS1_ADDR: usize = 0x1c;
pub const OUT_ADDR: usize = 0x28;
pub const DO_INIT: usize = 0x34;
pub const LAYER_TYPE: usize = 0x3c;
pub const KERNEL_DIM: usize = 0x44;
pub const LOG2_STRIDE: usize = 0x4c;
pub const IFM_CH: usize = 0x54;
pub const OFM_CH: usize = 0x5c;
pub const IFM_DIM: usize = 0x64;
pub const PADDED_DIM: usize = 0x6c;
pub const OFM_DIM: usize = 0x74;
pub const POOL_IN_DIM: usize = 0x7c;
pub const POOL_OUT_DIM: usize = 0x84;
pub const POOL_STRIDE: usize = 0x8c;

/// Control register bits.
pub mod ctrl {
    /// Written to start the accelerator.
    pub const GO: u32 = 1 << 0;
    /// Set by the accelerator when the current run is finished.
    pub const DONE: u32 = 1 << 1;
}
