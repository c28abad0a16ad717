// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for network description loading and layer graph construction.

use std::path::PathBuf;

/// Errors that can occur when reading descriptions or deriving the layer graph.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A description file could not be read.
    #[error("failed to read description: {0}")]
    ReadError(#[from] std::io::Error),

    /// A description document is not valid JSON or misses a required field.
    #[error("failed to parse description: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A file the description refers to does not exist.
    #[error("missing file '{}'", path.display())]
    MissingFile { path: PathBuf },

    /// A layer record failed per-kind validation.
    #[error("malformed layer at index {index}: {detail}")]
    MalformedLayer { index: usize, detail: String },

    /// A hardware capacity value is out of range.
    #[error("invalid hardware parameter {field}: {detail}")]
    InvalidConfig { field: &'static str, detail: String },

    /// The derived layer graph cannot be executed.
    #[error("invalid layer graph: {0}")]
    InvalidGraph(String),
}
