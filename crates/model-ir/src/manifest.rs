// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer description document.
//!
//! # Format
//! ```json
//! {
//!   "network": "cnv-w1a2",
//!   "input_image": "input.bin",
//!   "verification_image": "golden.bin",
//!   "use_binparams": true,
//!   "binparam": "binparam-cnv",
//!   "binparam_skip": 0,
//!   "layer_skip": 0,
//!   "layers": [
//!     { "func": "conv_layer", "kernel_shape": 3, "kernel_stride": 1,
//!       "input": [3, 32, 32], "output": [64, 32, 32], "padding": 1 },
//!     { "func": "maxpool_layer", "kernel_shape": 2, "kernel_stride": 2,
//!       "input": [64, 32, 32], "output": [64, 16, 16], "padding": 0 },
//!     { "func": "split_layer", "split": 2, "input_channels": 64, "input_dim": 16 },
//!     { "func": "merge_layer", "merge": 2, "output_channels": 64, "output_dim": 16 },
//!     { "func": "fc_layer", "input": 256, "output": 10 }
//!   ]
//! }
//! ```
//!
//! Paths are relative to the document's own directory. Layer records are
//! kept as raw JSON here and validated one by one in
//! [`LayerDocument::records`], so an error names the offending index.

use crate::ModelError;
use serde::Deserialize;
use std::path::Path;

/// Top-level layer description document.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LayerDocument {
    /// Network name.
    pub network: String,
    pub input_image: String,
    pub verification_image: String,
    /// Load weights from per-PE binary files.
    pub use_binparams: bool,
    /// Weight file directory.
    pub binparam: String,
    /// Offset added to every weight file index.
    pub binparam_skip: usize,
    /// Leading records to ignore.
    pub layer_skip: usize,
    pub layers: Vec<serde_json::Value>,
}

impl LayerDocument {
    /// Loads a document from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a document from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let doc: Self = serde_json::from_str(json)?;
        Ok(doc)
    }

    /// Validates every record from `layer_skip` on, returning them with
    /// their document index.
    pub(crate) fn records(&self) -> Result<Vec<(usize, LayerRecord)>, ModelError> {
        self.layers
            .iter()
            .enumerate()
            .skip(self.layer_skip)
            .map(|(index, value)| LayerRecord::parse(index, value).map(|r| (index, r)))
            .collect()
    }
}

/// Geometry shared by convolution and max-pool records.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub(crate) struct WindowRecord {
    pub kernel_shape: usize,
    pub kernel_stride: usize,
    /// `[channels, dim, dim]`
    pub input: [usize; 3],
    /// `[channels, dim, dim]`
    pub output: [usize; 3],
    pub padding: f64,
}

/// One validated layer record.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "func", rename_all = "snake_case")]
pub(crate) enum LayerRecord {
    ConvLayer(WindowRecord),
    MaxpoolLayer(WindowRecord),
    SplitLayer {
        split: usize,
        input_channels: usize,
        input_dim: usize,
    },
    MergeLayer {
        merge: usize,
        output_channels: usize,
        output_dim: usize,
    },
    FcLayer {
        input: usize,
        output: usize,
    },
}

impl LayerRecord {
    fn parse(index: usize, value: &serde_json::Value) -> Result<Self, ModelError> {
        let malformed = |detail: String| ModelError::MalformedLayer { index, detail };

        let record = Self::deserialize(value).map_err(|e| malformed(e.to_string()))?;
        match &record {
            Self::ConvLayer(w) | Self::MaxpoolLayer(w) => {
                if w.kernel_shape == 0 || w.kernel_stride == 0 {
                    return Err(malformed("kernel shape and stride must be non-zero".into()));
                }
                if w.padding < 0.0 || w.padding.fract() != 0.0 {
                    return Err(malformed(format!(
                        "padding {} is not a whole number of pixels",
                        w.padding
                    )));
                }
            }
            Self::SplitLayer { split: 0, .. } => {
                return Err(malformed("split factor must be non-zero".into()));
            }
            Self::MergeLayer { merge: 0, .. } => {
                return Err(malformed("merge factor must be non-zero".into()));
            }
            _ => {}
        }
        Ok(record)
    }

    pub fn function(&self) -> &'static str {
        match self {
            Self::ConvLayer(_) => "conv_layer",
            Self::MaxpoolLayer(_) => "maxpool_layer",
            Self::SplitLayer { .. } => "split_layer",
            Self::MergeLayer { .. } => "merge_layer",
            Self::FcLayer { .. } => "fc_layer",
        }
    }
}
