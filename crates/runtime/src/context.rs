// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Process-level entry points.
//!
//! ```text
//! RuntimeContext::new(config)
//!     │  init_parameters(batch, threads)         optional, before init
//!     │  init_accelerator(network, layers)       or init_accelerator_bundle(dir)
//!     ▼
//! single_inference(input, output) / run_batch(images)   any number of times
//!     │
//!     ▼
//! deinit()                                       idempotent
//! ```
//!
//! The context owns at most one ready engine. There is no global state;
//! callers that need to tear down from a signal handler share the context
//! behind a mutex.

use crate::engine::{InferenceEngine, Ready};
use crate::metrics::StageTimings;
use crate::{RuntimeConfig, RuntimeError};
use dispatcher::{select_backend, BackendKind};
use model_ir::{graph::Validated, GraphFootprint, LayerGraph, NetworkLoader};
use std::path::Path;

/// Owns the configuration and, once initialised, the inference engine.
#[derive(Debug)]
pub struct RuntimeContext {
    config: RuntimeConfig,
    engine: Option<InferenceEngine<Ready>>,
}

impl RuntimeContext {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            engine: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Sets batch size and worker count. Ignored once the accelerator is
    /// initialised; a batch of 0 is treated as 1.
    pub fn init_parameters(&mut self, batch: usize, threads: usize) {
        if self.engine.is_some() {
            tracing::warn!("runtime already initialised, ignoring batch {batch} / threads {threads}");
            return;
        }
        self.config.batch = batch.max(1);
        self.config.threads = threads;
    }

    /// Loads the network from its two description files and prepares the
    /// engine. Replaces any engine already running.
    pub fn init_accelerator(&mut self, network_json: &Path, layers_json: &Path) -> Result<(), RuntimeError> {
        let graph = NetworkLoader::load(network_json, layers_json)?;
        self.start(graph)
    }

    /// Loads a bundle directory, programming its bitstream first when the
    /// hardware backend is selected.
    pub fn init_accelerator_bundle(&mut self, dir: &Path) -> Result<(), RuntimeError> {
        let bundle = NetworkLoader::load_bundle(dir)?;
        match (&bundle.bitstream, self.config.backend) {
            (Some(bitstream), BackendKind::Hardware) => self.program_bitstream(bitstream)?,
            (Some(bitstream), BackendKind::Software) => {
                tracing::info!("software backend, not programming {}", bitstream.display());
            }
            (None, _) => tracing::warn!("bundle {} carries no bitstream", dir.display()),
        }
        self.start(bundle.graph)
    }

    /// Initialises from whatever the configuration names: a bundle when
    /// set, otherwise the network and layer documents.
    pub fn init_from_config(&mut self) -> Result<(), RuntimeError> {
        if let Some(bundle) = self.config.bundle.clone() {
            return self.init_accelerator_bundle(&bundle);
        }
        match (self.config.network.clone(), self.config.layers.clone()) {
            (Some(network), Some(layers)) => self.init_accelerator(&network, &layers),
            _ => Err(RuntimeError::ConfigError(
                "either a bundle or both network and layer documents are required".into(),
            )),
        }
    }

    fn start(&mut self, graph: LayerGraph<Validated>) -> Result<(), RuntimeError> {
        self.deinit();
        let dispatcher = select_backend(self.config.backend, &self.config.device, &graph.hardware)?;
        let engine = InferenceEngine::new(self.config.clone())
            .load(graph, dispatcher)?
            .prepare()?;
        tracing::info!(
            "accelerator ready: {} backend, batch {}",
            engine.backend(),
            engine.batch()
        );
        self.engine = Some(engine);
        Ok(())
    }

    /// Copies the bitstream into the firmware directory and hands its file
    /// name to the FPGA manager.
    fn program_bitstream(&self, bitstream: &Path) -> Result<(), RuntimeError> {
        let failed = |detail: String| RuntimeError::BitstreamError {
            path: bitstream.to_path_buf(),
            detail,
        };
        let name = bitstream
            .file_name()
            .ok_or_else(|| failed("bitstream path has no file name".into()))?;
        let target = self.config.firmware_dir.join(name);
        std::fs::copy(bitstream, &target)
            .map_err(|e| failed(format!("copy to {}: {e}", target.display())))?;
        std::fs::write(&self.config.fpga_manager, name.to_string_lossy().as_bytes())
            .map_err(|e| failed(format!("write {}: {e}", self.config.fpga_manager.display())))?;
        tracing::info!("programmed {} through {}", target.display(), self.config.fpga_manager.display());
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        self.engine.is_some()
    }

    fn engine(&self, op: &'static str) -> Result<&InferenceEngine<Ready>, RuntimeError> {
        self.engine.as_ref().ok_or(RuntimeError::NotInitialised(op))
    }

    pub fn graph(&self) -> Result<&LayerGraph<Validated>, RuntimeError> {
        Ok(self.engine("graph")?.graph())
    }

    pub fn footprint(&self) -> Result<&GraphFootprint, RuntimeError> {
        Ok(self.engine("footprint")?.footprint())
    }

    pub fn timings(&self) -> Result<&StageTimings, RuntimeError> {
        Ok(self.engine("timings")?.timings())
    }

    /// Runs one image.
    ///
    /// An input whose length differs from `in_mem` is re-packed element by
    /// element (`in_dim²` elements); the output is re-packed the same way
    /// from `out_mem` bytes over `out_dim²` elements.
    pub fn single_inference(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), RuntimeError> {
        let engine = self
            .engine
            .as_mut()
            .ok_or(RuntimeError::NotInitialised("single_inference"))?;
        let fp = *engine.footprint();

        let repacked;
        let image = if input.len() == fp.in_mem {
            input
        } else {
            let mut buf = vec![0u8; fp.in_mem];
            tensor_core::pad_or_truncate(&mut buf, input, fp.in_dim * fp.in_dim)?;
            repacked = buf;
            &repacked[..]
        };

        let mut results = engine.run_batch(&[image])?;
        let result = results.pop().ok_or(RuntimeError::SizeMismatch {
            what: "batch results",
            expected: 1,
            actual: 0,
        })?;
        if output.len() == result.len() {
            output.copy_from_slice(&result);
        } else {
            tensor_core::pad_or_truncate(output, &result, fp.out_dim * fp.out_dim)?;
        }
        Ok(())
    }

    /// Runs up to `batch` images and returns `out_mem` bytes per image.
    pub fn run_batch(&mut self, images: &[&[u8]]) -> Result<Vec<Vec<u8>>, RuntimeError> {
        self.engine
            .as_mut()
            .ok_or(RuntimeError::NotInitialised("run_batch"))?
            .run_batch(images)
    }

    /// Stops the workers and releases every buffer and device mapping.
    /// Safe to call repeatedly.
    pub fn deinit(&mut self) {
        if let Some(engine) = self.engine.take() {
            tracing::info!("shutting down: {}", engine.pool_stats().summary());
            drop(engine);
        }
    }
}

impl Drop for RuntimeContext {
    fn drop(&mut self) {
        self.deinit();
    }
}
