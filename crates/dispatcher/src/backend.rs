// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The dispatch interface and backend selection.
//!
//! ```text
//!                 ┌──────────────────────┐
//!  engine ──────► │  dyn Dispatcher      │
//!                 └──────────┬───────────┘
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!   HardwareBackend<RegisterWindow>   SoftwareBackend
//!   (MMIO registers + udmabuf)        (reference computation
//!                                      on host memory)
//! ```
//!
//! A layer runs in two phases so the host can do useful work while the
//! accelerator computes:
//!
//! 1. [`Dispatcher::dispatch`] claims the input and output buffers and
//!    programs the layer; [`Dispatcher::dispatch_async`] starts it.
//! 2. [`Dispatcher::running`] can be polled freely; [`Dispatcher::sync`]
//!    waits for completion and drops both claims. `sync` is idempotent.

use crate::backends::{HardwareBackend, SoftwareBackend};
use crate::{DeviceConfig, DispatchError};
use memory_manager::{Buffer, DeviceAllocator, DeviceMemory};
use model_ir::{HardwareConfig, LayerDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which implementation runs the layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// CPU reference computation on host memory.
    #[default]
    Software,
    /// The accelerator behind its register window.
    Hardware,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Software => f.write_str("software"),
            Self::Hardware => f.write_str("hardware"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "software" | "sw" => Ok(Self::Software),
            "hardware" | "hw" => Ok(Self::Hardware),
            other => Err(format!("unknown backend '{other}' (expected software or hardware)")),
        }
    }
}

/// Runs one layer at a time on an accelerator.
pub trait Dispatcher: Send + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Allocator for memory the accelerator can address (buffers and
    /// weight banks).
    fn allocator(&self) -> Arc<dyn DeviceAllocator>;

    /// Takes ownership of the per-channel weight blocks of `bank`.
    fn install_weights(&mut self, bank: usize, channels: Vec<Box<dyn DeviceMemory>>);

    /// Number of installed weight banks.
    fn weight_banks(&self) -> usize;

    /// Loads bank `layer.weight_index + offset` into the accelerator and
    /// starts the load. Completes on the next [`Dispatcher::sync`].
    fn dispatch_weights(
        &mut self,
        layer: &LayerDescriptor,
        offset: usize,
    ) -> Result<(), DispatchError>;

    /// Claims `input` and `output` and programs `layer` for them.
    fn dispatch(
        &mut self,
        input: Arc<Buffer>,
        output: Arc<Buffer>,
        layer: &LayerDescriptor,
    ) -> Result<(), DispatchError>;

    /// Starts the programmed layer and returns immediately.
    fn dispatch_async(&mut self) -> Result<(), DispatchError>;

    /// Blocks until the current run reports done.
    fn wait(&mut self) -> Result<(), DispatchError>;

    /// Non-blocking: `true` while a started run has not reported done.
    fn running(&self) -> Result<bool, DispatchError>;

    /// Waits for the current run if needed, then releases the buffer
    /// claims taken by `dispatch`. A second call is a no-op.
    fn sync(&mut self) -> Result<(), DispatchError>;

    /// Starts the programmed layer and waits for it.
    fn exec(&mut self) -> Result<(), DispatchError> {
        self.dispatch_async()?;
        self.sync()
    }
}

/// Creates the backend selected by `kind`.
///
/// The hardware backend maps the register window and the DMA region
/// described by `device`; the software backend needs neither.
pub fn select_backend(
    kind: BackendKind,
    device: &DeviceConfig,
    hw: &HardwareConfig,
) -> Result<Box<dyn Dispatcher>, DispatchError> {
    tracing::info!("selecting {kind} backend");
    match kind {
        BackendKind::Software => Ok(Box::new(SoftwareBackend::new(*hw))),
        BackendKind::Hardware => Ok(Box::new(HardwareBackend::open(device)?)),
    }
}

/// Claims both buffers of a dispatch, rejecting aliasing.
pub(crate) fn claim_pair(input: &Buffer, output: &Buffer) -> Result<(), DispatchError> {
    if input.id() == output.id() {
        return Err(DispatchError::AliasedBuffers { id: input.id() });
    }
    input.claim();
    output.claim();
    Ok(())
}
