// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device paths and addresses for the hardware backend.

use crate::regs::{REGISTER_BASE, REGISTER_SPAN};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the accelerator's registers and DMA memory live.
///
/// Deserialised from the `[device]` table of the runtime configuration;
/// every field has a default matching the reference board image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Physical base address of the register window.
    pub register_base: u64,
    /// Size of the register window in bytes.
    pub register_span: usize,
    /// Memory device the register window is mapped from.
    pub memory_device: PathBuf,
    /// udmabuf character device providing contiguous DMA memory.
    pub dma_device: PathBuf,
    /// sysfs attribute holding the DMA region's physical address.
    pub dma_phys_addr: PathBuf,
    /// sysfs attribute holding the DMA region's size in bytes.
    pub dma_size: PathBuf,
    /// Alignment of every block carved from the DMA region.
    pub dma_alignment: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            register_base: REGISTER_BASE,
            register_span: REGISTER_SPAN,
            memory_device: PathBuf::from("/dev/mem"),
            dma_device: PathBuf::from("/dev/udmabuf0"),
            dma_phys_addr: PathBuf::from("/sys/class/u-dma-buf/udmabuf0/phys_addr"),
            dma_size: PathBuf::from("/sys/class/u-dma-buf/udmabuf0/size"),
            dma_alignment: 64,
        }
    }
}
