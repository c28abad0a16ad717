// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CPU stand-in for the accelerator.
//!
//! Same call sequence as the hardware backend, but a started layer is
//! computed on the spot by [`run_layer`](crate::reference::run_layer), so
//! `wait` and `running` have nothing left to do.

use crate::backend::claim_pair;
use crate::reference::run_layer;
use crate::{BackendKind, DispatchError, Dispatcher, WeightBanks};
use memory_manager::{lock_pair, Buffer, DeviceAllocator, DeviceMemory, HostAllocator};
use model_ir::{HardwareConfig, LayerDescriptor};
use std::sync::Arc;

#[derive(Debug)]
struct Staged {
    input: Arc<Buffer>,
    output: Arc<Buffer>,
    layer: LayerDescriptor,
    computed: bool,
}

/// Runs layers with the reference computation on host memory.
#[derive(Debug)]
pub struct SoftwareBackend {
    hw: HardwareConfig,
    allocator: Arc<HostAllocator>,
    banks: WeightBanks,
    /// Bank selected by the last `dispatch_weights`.
    active_bank: Option<usize>,
    staged: Option<Staged>,
}

impl SoftwareBackend {
    pub fn new(hw: HardwareConfig) -> Self {
        Self {
            hw,
            allocator: Arc::new(HostAllocator),
            banks: WeightBanks::new(),
            active_bank: None,
            staged: None,
        }
    }

    fn compute(&self, staged: &Staged) -> Result<(), DispatchError> {
        let bank = self.active_bank.and_then(|b| self.banks.get(b));
        let (input, mut output) = lock_pair(&staged.input, &staged.output);
        run_layer(
            &self.hw,
            &staged.layer,
            bank,
            input.as_slice(),
            output.as_mut_slice(),
        )
    }
}

impl Dispatcher for SoftwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn allocator(&self) -> Arc<dyn DeviceAllocator> {
        self.allocator.clone()
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
        if self.banks.get(bank).is_none() {
            tracing::trace!("weight bank {bank} not installed, computing with zero weights");
        }
        self.active_bank = Some(bank);
        Ok(())
    }

    fn dispatch(
        &mut self,
        input: Arc<Buffer>,
        output: Arc<Buffer>,
        layer: &LayerDescriptor,
    ) -> Result<(), DispatchError> {
        claim_pair(&input, &output)?;
        self.staged = Some(Staged {
            input,
            output,
            layer: layer.clone(),
            computed: false,
        });
        Ok(())
    }

    fn dispatch_async(&mut self) -> Result<(), DispatchError> {
        let Some(staged) = self.staged.as_ref() else {
            return Ok(());
        };
        if staged.computed {
            return Ok(());
        }
        let result = self.compute(staged);
        if let Some(staged) = self.staged.as_mut() {
            staged.computed = true;
        }
        result
    }

    fn wait(&mut self) -> Result<(), DispatchError> {
        Ok(())
    }

    fn running(&self) -> Result<bool, DispatchError> {
        Ok(false)
    }

    fn sync(&mut self) -> Result<(), DispatchError> {
        if let Some(staged) = self.staged.take() {
            staged.input.unclaim();
            staged.output.unclaim();
        }
        Ok(())
    }
}
