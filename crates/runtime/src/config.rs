// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! network = "./cnv/network.json"
//! layers = "./cnv/layers.json"
//! batch = 4
//! threads = 2
//! backend = "hardware"
//! acquire_timeout_ms = 5000
//! max_buffers = 100
//! enable_profiling = true
//!
//! [device]
//! register_base = 0xA0000000
//! dma_device = "/dev/udmabuf0"
//! ```

use crate::RuntimeError;
use dispatcher::{BackendKind, DeviceConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the network description path.
pub const ENV_NETWORK_JSON: &str = "QNN_NETWORK_JSON";
/// Environment variable overriding the layer description path.
pub const ENV_LAYERS_JSON: &str = "QNN_LAYERS_JSON";

/// Configuration for the inference runtime.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Network description (hardware capacities).
    pub network: Option<PathBuf>,
    /// Layer description.
    pub layers: Option<PathBuf>,
    /// Bundle directory holding both documents and optionally a bitstream.
    pub bundle: Option<PathBuf>,
    /// Images per batch.
    pub batch: usize,
    /// Worker threads; 0 runs every job inline.
    pub threads: usize,
    pub backend: BackendKind,
    /// How long `acquire` waits for a free buffer.
    pub acquire_timeout_ms: u64,
    /// Growth cap per buffer kind.
    pub max_buffers: usize,
    /// Whether to accumulate per-stage timings.
    pub enable_profiling: bool,
    /// Firmware directory the FPGA manager loads bitstreams from.
    pub firmware_dir: PathBuf,
    /// FPGA manager attribute that takes the bitstream's file name.
    pub fpga_manager: PathBuf,
    pub device: DeviceConfig,
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        let cfg: Self = toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_buffers == 0 {
            return Err(RuntimeError::ConfigError("max_buffers must be at least 1".into()));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(RuntimeError::ConfigError(
                "acquire_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Fills unset document paths from `QNN_NETWORK_JSON` / `QNN_LAYERS_JSON`.
    pub fn apply_env(&mut self) {
        if self.network.is_none() {
            self.network = std::env::var_os(ENV_NETWORK_JSON).map(PathBuf::from);
        }
        if self.layers.is_none() {
            self.layers = std::env::var_os(ENV_LAYERS_JSON).map(PathBuf::from);
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            network: None,
            layers: None,
            bundle: None,
            batch: 1,
            threads: 0,
            backend: BackendKind::Software,
            acquire_timeout_ms: 5000,
            max_buffers: memory_manager::pool::DEFAULT_MAX_BUFFERS,
            enable_profiling: true,
            firmware_dir: PathBuf::from("/lib/firmware"),
            fpga_manager: PathBuf::from("/sys/class/fpga_manager/fpga0/firmware"),
            device: DeviceConfig::default(),
        }
    }
}
