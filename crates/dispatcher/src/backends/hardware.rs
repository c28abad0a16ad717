// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Accelerator behind a memory-mapped register window.

use crate::backend::claim_pair;
use crate::mmio::{RegisterBus, RegisterWindow};
use crate::regs::{self, ctrl};
use crate::{BackendKind, DeviceConfig, DispatchError, Dispatcher, DmaAllocator, WeightBanks};
use memory_manager::{Buffer, DeviceAllocator, DeviceMemory};
use model_ir::{HardwareLayerType, LayerDescriptor};
use std::sync::Arc;

/// Drives the accelerator through its control registers.
///
/// Generic over the register bus so the protocol can be exercised against
/// a recording fake; production code uses the mapped [`RegisterWindow`].
#[derive(Debug)]
pub struct HardwareBackend<B: RegisterBus = RegisterWindow> {
    bus: B,
    allocator: Arc<dyn DeviceAllocator>,
    banks: WeightBanks,
    running: bool,
    /// Buffers claimed by the last `dispatch`, released by `sync`.
    claimed: Option<(Arc<Buffer>, Arc<Buffer>)>,
}

impl HardwareBackend<RegisterWindow> {
    /// Maps the register window and the DMA region described by `cfg`.
    pub fn open(cfg: &DeviceConfig) -> Result<Self, DispatchError> {
        let bus = RegisterWindow::open(&cfg.memory_device, cfg.register_base, cfg.register_span)?;
        let allocator = DmaAllocator::open(cfg)?;
        Ok(Self::with_bus(bus, Arc::new(allocator)))
    }
}

impl<B: RegisterBus> HardwareBackend<B> {
    pub fn with_bus(bus: B, allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            bus,
            allocator,
            banks: WeightBanks::new(),
            running: false,
            claimed: None,
        }
    }

    fn done(&self) -> Result<bool, DispatchError> {
        Ok(self.bus.read(regs::CTRL)? & ctrl::DONE != 0)
    }

    fn write_geometry(&mut self, layer: &LayerDescriptor) -> Result<(), DispatchError> {
        let fields = [
            (regs::LAYER_TYPE, layer.hw_type.code()),
            (regs::KERNEL_DIM, layer.kernel_dim as u32),
            (regs::LOG2_STRIDE, layer.log2_stride as u32),
            (regs::IFM_CH, layer.ifm_ch as u32),
            (regs::OFM_CH, layer.ofm_ch as u32),
            (regs::IFM_DIM, layer.ifm_dim as u32),
            (regs::PADDED_DIM, layer.padded_dim as u32),
            (regs::OFM_DIM, layer.ofm_dim as u32),
            (regs::POOL_IN_DIM, layer.pool_in_dim as u32),
            (regs::POOL_OUT_DIM, layer.pool_out_dim as u32),
            (regs::POOL_STRIDE, layer.pool_stride as u32),
        ];
        for (offset, value) in fields {
            self.bus.write(offset, value)?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DispatchError> {
        self.bus.write(regs::CTRL, ctrl::GO)?;
        self.running = true;
        Ok(())
    }
}

fn bus_address(buffer: &Buffer) -> Result<u64, DispatchError> {
    buffer
        .physical_address()
        .ok_or(DispatchError::NotDeviceBuffer { id: buffer.id() })
}

impl<B: RegisterBus> Dispatcher for HardwareBackend<B> {
    fn kind(&self) -> BackendKind {
        BackendKind::Hardware
    }

    fn allocator(&self) -> Arc<dyn DeviceAllocator> {
        Arc::clone(&self.allocator)
    }

    fn install_weights(&mut self, bank: usize, channels: Vec<Box<dyn DeviceMemory>>) {
        self.banks.insert(bank, channels);
    }

    fn weight_banks(&self) -> usize {
        self.banks.len()
    }

    fn dispatch_weights(
        &mut self,
        layer: &LayerDescriptor,
        offset: usize,
    ) -> Result<(), DispatchError> {
        let bank = layer.weight_index + offset;
        let ch0 = self
            .banks
            .channel(bank, 0)
            .ok_or(DispatchError::MissingWeights { bank, channel: 0 })?
            .physical_address();
        let ch1 = self.banks.channel(bank, 1).map(|m| m.physical_address());
        tracing::debug!("loading weight bank {bank} for record {}", layer.record);

        self.bus.write64(regs::WEIGHTS0_ADDR, ch0)?;
        if let Some(ch1) = ch1 {
            self.bus.write64(regs::WEIGHTS1_ADDR, ch1)?;
        }
        self.bus.write(regs::DO_INIT, 1)?;
        self.bus.write(regs::LAYER_TYPE, HardwareLayerType::Conv.code())?;
        self.bus.write(regs::KERNEL_DIM, layer.kernel_dim as u32)?;
        self.start()
    }

    fn dispatch(
        &mut self,
        input: Arc<Buffer>,
        output: Arc<Buffer>,
        layer: &LayerDescriptor,
    ) -> Result<(), DispatchError> {
        let in_addr = bus_address(&input)?;
        let out_addr = bus_address(&output)?;
        claim_pair(&input, &output)?;
        self.claimed = Some((input, output));

        self.bus.write(regs::DO_INIT, 0)?;
        self.bus.write64(regs::IN_ADDR, in_addr)?;
        self.bus.write64(regs::OUT_ADDR, out_addr)?;
        self.write_geometry(layer)
    }

    fn dispatch_async(&mut self) -> Result<(), DispatchError> {
        self.start()
    }

    fn wait(&mut self) -> Result<(), DispatchError> {
        while !self.done()? {
            std::hint::spin_loop();
        }
        self.running = false;
        Ok(())
    }

    fn running(&self) -> Result<bool, DispatchError> {
        if !self.running {
            return Ok(false);
        }
        Ok(!self.done()?)
    }

    fn sync(&mut self) -> Result<(), DispatchError> {
        if self.running {
            self.wait()?;
        }
        if let Some((input, output)) = self.claimed.take() {
            input.unclaim();
            output.unclaim();
        }
        Ok(())
    }
}
