// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Network loading from description files.
//!
//! A network is described by two JSON documents: the accelerator
//! capacities (`network.json`, see [`HardwareConfig`]) and the layer
//! description (`layers.json`, see [`LayerDocument`]). They can be given as
//! two paths or packaged in a bundle directory:
//!
//! ```text
//! bundle/
//! ├── network.json
//! ├── layers.json
//! └── bitstream      (optional accelerator image)
//! ```

use crate::graph::Validated;
use crate::{HardwareConfig, LayerDocument, LayerGraph, ModelError};
use std::path::{Path, PathBuf};

/// Capacity document name inside a bundle.
pub const NETWORK_FILE: &str = "network.json";

/// Layer document name inside a bundle.
pub const LAYERS_FILE: &str = "layers.json";

/// Accelerator image name inside a bundle.
pub const BITSTREAM_FILE: &str = "bitstream";

/// A loaded bundle: the validated graph plus the accelerator image, if any.
#[derive(Debug, Clone)]
pub struct NetworkBundle {
    pub graph: LayerGraph<Validated>,
    pub bitstream: Option<PathBuf>,
}

/// Loads description files into a validated [`LayerGraph`].
///
/// # Example
/// ```no_run
/// use model_ir::NetworkLoader;
/// use std::path::Path;
///
/// let graph = NetworkLoader::load(
///     Path::new("./cnv/network.json"),
///     Path::new("./cnv/layers.json"),
/// ).unwrap();
/// println!("{}", graph.summary());
/// ```
pub struct NetworkLoader;

impl NetworkLoader {
    /// Loads and validates a network from its two description files.
    ///
    /// Steps:
    /// 1. Parse and validate the hardware capacities.
    /// 2. Parse the layer document.
    /// 3. Derive the graph, resolving paths against the layer document's
    ///    directory, and validate it.
    pub fn load(network_json: &Path, layers_json: &Path) -> Result<LayerGraph<Validated>, ModelError> {
        let hardware = HardwareConfig::from_file(network_json)?;
        tracing::debug!("hardware capacities from {}", network_json.display());

        let doc = LayerDocument::from_file(layers_json)?;
        let base_dir = document_dir(layers_json)?;
        let graph = LayerGraph::parse(&doc, hardware, &base_dir)?.validate()?;

        tracing::info!("{}", graph.summary());
        Ok(graph)
    }

    /// Loads a bundle directory.
    pub fn load_bundle(dir: &Path) -> Result<NetworkBundle, ModelError> {
        if !dir.is_dir() {
            return Err(ModelError::MissingFile {
                path: dir.to_path_buf(),
            });
        }
        let graph = Self::load(&dir.join(NETWORK_FILE), &dir.join(LAYERS_FILE))?;
        let bitstream = dir.join(BITSTREAM_FILE);
        let bitstream = bitstream.is_file().then_some(bitstream);
        Ok(NetworkBundle { graph, bitstream })
    }
}

/// Absolute directory containing `path`.
fn document_dir(path: &Path) -> Result<PathBuf, ModelError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/")))
}
