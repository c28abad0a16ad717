// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! Host-side description of a quantized network for the layer accelerator.
//!
//! - [`HardwareConfig`]: the accelerator's synthesis-time capacities.
//! - [`LayerDocument`]: the JSON layer description.
//! - [`LayerDescriptor`]: one effective layer with every derived quantity
//!   (iteration folding, weight footprint, buffer sizes, weight banks).
//! - [`LayerGraph`]: the ordered descriptors, with a **type-state pattern**
//!   (`Loaded` → `Validated`).
//! - [`NetworkLoader`]: loads the two documents, or a bundle directory.
//!
//! # Example
//! ```no_run
//! use model_ir::NetworkLoader;
//! use std::path::Path;
//!
//! let bundle = NetworkLoader::load_bundle(Path::new("./cnv-w1a2")).unwrap();
//! println!("{}", bundle.graph.summary());
//! for layer in bundle.graph.iter_layers() {
//!     println!("  {}", layer.summary());
//! }
//! ```

mod error;
pub mod graph;
mod hardware;
mod layer;
mod loader;
mod manifest;

pub use error::ModelError;
pub use graph::{GraphFootprint, LayerGraph, NetworkMeta};
pub use hardware::HardwareConfig;
pub use layer::{HardwareLayerType, LayerDescriptor, LayerKind};
pub use loader::{NetworkBundle, NetworkLoader, BITSTREAM_FILE, LAYERS_FILE, NETWORK_FILE};
pub use manifest::LayerDocument;
