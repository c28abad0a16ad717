// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer graph: the network as an ordered sequence of effective layers.
//!
//! # Derivation
//!
//! Records are walked in document order with a little running state
//! (weight bank counter, split mode, compute layers seen in the current
//! split region):
//!
//! ```text
//! conv ─┬─ followed by maxpool ─► one CONV|MAX_POOL descriptor
//!       └─ otherwise ───────────► one CONV descriptor
//! maxpool ──────────────────────► folded above, never emitted on its own
//! fc ───────────────────────────► one FC descriptor (1×1 conv on a 1×1 map)
//! split(n) … merge(n) ──────────► markers; compute layers between them run
//!                                 once per slice with their own weights
//! ```
//!
//! Output channels above `MAX_OFM_CH` are folded into `iterations` passes of
//! `ceil(out_ch / iterations)` channels each.
//!
//! # Type-State Pattern
//!
//! ```text
//! LayerGraph<Loaded>    : records parsed, derived fields filled in.
//!       │  .validate()
//!       ▼
//! LayerGraph<Validated> : split regions balanced, capacities respected.
//! ```
//!
//! The runtime only accepts a `LayerGraph<Validated>`.

use crate::manifest::{LayerRecord, WindowRecord};
use crate::{HardwareConfig, HardwareLayerType, LayerDescriptor, LayerDocument, LayerKind, ModelError};
use std::fmt;
use std::path::{Path, PathBuf};

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been derived but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated and is ready to execute.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── Metadata ───────────────────────────────────────────────────────

/// Document-level settings, with paths resolved against the document's
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NetworkMeta {
    pub name: String,
    pub input_image: PathBuf,
    pub verification_image: PathBuf,
    pub use_binparams: bool,
    pub binparam_dir: PathBuf,
    pub binparam_skip: usize,
}

impl NetworkMeta {
    fn from_document(doc: &LayerDocument, base_dir: &Path) -> Self {
        Self {
            name: doc.network.clone(),
            input_image: base_dir.join(&doc.input_image),
            verification_image: base_dir.join(&doc.verification_image),
            use_binparams: doc.use_binparams,
            binparam_dir: base_dir.join(&doc.binparam),
            binparam_skip: doc.binparam_skip,
        }
    }
}

/// Whole-network sizes used to reserve buffers and stage I/O.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GraphFootprint {
    pub in_ch: usize,
    pub in_dim: usize,
    /// Output channels of the last layer, all iterations included.
    pub out_ch: usize,
    pub out_dim: usize,
    /// Largest spatial dimension seen anywhere, folded pools included.
    pub max_dim: usize,
    pub max_iterations: usize,
    pub max_split: usize,
    /// Size every pool buffer must have.
    pub max_buffer_size: usize,
    pub in_mem: usize,
    pub in_words: usize,
    pub out_mem: usize,
    pub out_words: usize,
    /// Weight banks the graph addresses.
    pub weight_banks: usize,
}

// ── LayerGraph ─────────────────────────────────────────────────────

/// The network as an ordered sequence of effective layers.
#[derive(Debug, Clone)]
pub struct LayerGraph<S: GraphState = Loaded> {
    pub meta: NetworkMeta,
    pub hardware: HardwareConfig,
    pub layers: Vec<LayerDescriptor>,
    pub footprint: GraphFootprint,
    _state: std::marker::PhantomData<S>,
}

#[derive(Default)]
struct DeriveState {
    weight_index: usize,
    split_mode: bool,
    current_split: usize,
    layers_in_split: usize,
    region_start: usize,
    first: bool,
}

// ── Loaded state ───────────────────────────────────────────────────

impl LayerGraph<Loaded> {
    /// Derives the graph from a layer document. Relative paths in the
    /// document are resolved against `base_dir`.
    pub fn parse(
        doc: &LayerDocument,
        hardware: HardwareConfig,
        base_dir: &Path,
    ) -> Result<Self, ModelError> {
        let records = doc.records()?;
        let (layers, footprint) = derive(&records, &hardware);
        tracing::debug!(
            "derived {} layers from {} records of '{}'",
            layers.len(),
            records.len(),
            doc.network
        );
        Ok(Self {
            meta: NetworkMeta::from_document(doc, base_dir),
            hardware,
            layers,
            footprint,
            _state: std::marker::PhantomData,
        })
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - The graph is non-empty.
    /// - Every split is closed by a merge with the same factor, without
    ///   nesting, and its factor divides its input channels.
    /// - No multi-iteration layer sits inside a split region.
    /// - Kernels, channel counts and dimensions fit the hardware, and the
    ///   concatenated output of every layer fits one pixel.
    pub fn validate(self) -> Result<LayerGraph<Validated>, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph("layer graph contains no layers".into()));
        }

        let hw = &self.hardware;
        let layout = hw.channel_layout();
        let pixel_bits = layout.pixel_stride() * 8;
        let mut open_split: Option<&LayerDescriptor> = None;

        for layer in &self.layers {
            let bad = |detail: String| {
                ModelError::InvalidGraph(format!("layer #{} ({}): {detail}", layer.record, layer.kind))
            };

            if layer.kind.contains(LayerKind::SPLIT) {
                if let Some(outer) = open_split {
                    return Err(bad(format!("nested inside split #{}", outer.record)));
                }
                if layer.in_ch % layer.split != 0 {
                    return Err(bad(format!(
                        "split factor {} does not divide {} channels",
                        layer.split, layer.in_ch
                    )));
                }
                open_split = Some(layer);
            } else if layer.kind.contains(LayerKind::MERGE) {
                let split = open_split.take().ok_or_else(|| bad("merge without split".into()))?;
                if split.split != layer.merge {
                    return Err(bad(format!(
                        "merge factor {} does not match split factor {} of #{}",
                        layer.merge, split.split, split.record
                    )));
                }
            } else if layer.kind.is_compute() {
                if layer.in_split && layer.iterations > 1 {
                    return Err(bad("multi-iteration layer inside a split region".into()));
                }
                if layer.kernel_dim > hw.max_k {
                    return Err(bad(format!("kernel {} exceeds MAX_K {}", layer.kernel_dim, hw.max_k)));
                }
                if layer.in_ch > hw.max_ifm_ch {
                    return Err(bad(format!(
                        "{} input channels exceed MAX_IFM_CH {}",
                        layer.in_ch, hw.max_ifm_ch
                    )));
                }
                if layer.out_ch > hw.max_ofm_ch {
                    return Err(bad(format!(
                        "{} output channels exceed MAX_OFM_CH {}",
                        layer.out_ch, hw.max_ofm_ch
                    )));
                }
                if layer.ifm_dim > hw.max_ifm_dim || layer.ofm_dim > hw.max_ofm_dim {
                    return Err(bad(format!(
                        "dimensions {}→{} exceed {}→{}",
                        layer.ifm_dim, layer.ofm_dim, hw.max_ifm_dim, hw.max_ofm_dim
                    )));
                }
            }

            let widest = layer.in_ch.max(layer.total_out_ch());
            if layout.channel_bits(widest) > pixel_bits {
                return Err(bad(format!(
                    "{widest} channels do not fit a {}-byte pixel",
                    layout.pixel_stride()
                )));
            }
        }

        if let Some(split) = open_split {
            return Err(ModelError::InvalidGraph(format!(
                "split #{} is never merged",
                split.record
            )));
        }

        Ok(LayerGraph {
            meta: self.meta,
            hardware: self.hardware,
            layers: self.layers,
            footprint: self.footprint,
            _state: std::marker::PhantomData,
        })
    }
}

// ── Validated state ────────────────────────────────────────────────

impl LayerGraph<Validated> {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Returns a reference to a layer by position.
    pub fn layer(&self, position: usize) -> Option<&LayerDescriptor> {
        self.layers.get(position)
    }

    /// Returns an iterator over the layers in execution order.
    pub fn iter_layers(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter()
    }

    /// Position of the first layer at or after `from` whose kind intersects
    /// `kind`.
    pub fn next_of_kind(&self, from: usize, kind: LayerKind) -> Option<usize> {
        self.layers
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, l)| l.kind.intersects(kind))
            .map(|(i, _)| i)
    }

    /// Returns a summary string describing the graph.
    pub fn summary(&self) -> String {
        let f = &self.footprint;
        format!(
            "Network '{}': {} layers, in {}ch×{} ({} B), out {}ch×{} ({} B), \
             max {} iterations, max split {}, {} weight banks, {} B buffers",
            self.meta.name,
            self.layers.len(),
            f.in_ch,
            f.in_dim,
            f.in_mem,
            f.out_ch,
            f.out_dim,
            f.out_mem,
            f.max_iterations,
            f.max_split,
            f.weight_banks,
            f.max_buffer_size,
        )
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: GraphState> fmt::Display for LayerGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LayerGraph '{}' ({} layers):", self.meta.name, self.layers.len())?;
        for layer in &self.layers {
            writeln!(f, "  {}", layer.summary())?;
        }
        Ok(())
    }
}

// ── Derivation ─────────────────────────────────────────────────────

fn derive(
    records: &[(usize, LayerRecord)],
    hw: &HardwareConfig,
) -> (Vec<LayerDescriptor>, GraphFootprint) {
    let mut layers: Vec<LayerDescriptor> = Vec::new();
    let mut footprint = GraphFootprint {
        max_iterations: 1,
        max_split: 1,
        ..GraphFootprint::default()
    };
    let mut st = DeriveState {
        current_split: 1,
        first: true,
        ..DeriveState::default()
    };

    for (pos, (index, record)) in records.iter().enumerate() {
        let mut layer = LayerDescriptor::new(*index, record.function());
        let mut add = false;

        match record {
            LayerRecord::ConvLayer(w) => {
                fill_window(&mut layer, w, hw);
                layer.kind |= LayerKind::CONV;
                layer.hw_type = HardwareLayerType::Conv;
                if let Some((_, LayerRecord::MaxpoolLayer(pool))) = records.get(pos + 1) {
                    fold_pool(&mut layer, pool);
                }
                stamp_compute(&mut layer, &mut st);
                add = true;
            }
            LayerRecord::MaxpoolLayer(w) => {
                // Already folded into the preceding conv; only its
                // dimensions matter from here on.
                fill_window(&mut layer, w, hw);
                layer.kind |= LayerKind::MAX_POOL;
            }
            LayerRecord::FcLayer { input, output } => {
                fill_fc(&mut layer, *input, *output, hw);
                stamp_compute(&mut layer, &mut st);
                add = true;
            }
            LayerRecord::SplitLayer {
                split,
                input_channels,
                input_dim,
            } => {
                layer.kind |= LayerKind::SPLIT;
                layer.split = *split;
                layer.in_ch = *input_channels;
                layer.in_dim = *input_dim;
                layer.out_ch = input_channels / split;
                layer.out_dim = *input_dim;
                st.split_mode = true;
                st.current_split = *split;
                st.layers_in_split = 0;
                st.region_start = layers.len() + 1;
                add = true;
            }
            LayerRecord::MergeLayer {
                merge,
                output_channels,
                output_dim,
            } => {
                layer.kind |= LayerKind::MERGE;
                layer.merge = *merge;
                layer.out_ch = *output_channels;
                layer.out_dim = *output_dim;
                layer.in_ch = output_channels / merge;
                layer.in_dim = *output_dim;
                st.weight_index += (merge - 1) * st.layers_in_split;
                layer.weight_index = st.layers_in_split;

                let stride = st.layers_in_split.max(1);
                for prior in layers.iter_mut().skip(st.region_start) {
                    if prior.kind.is_compute() && prior.in_split {
                        prior.slice_weight_stride = stride;
                    }
                }
                st.split_mode = false;
                st.current_split = 1;
                st.layers_in_split = 0;
                add = true;
            }
        }

        layer.in_size = hw.map_bytes(layer.in_dim);
        layer.out_size = hw.map_bytes(layer.out_dim);

        if add {
            footprint.out_dim = layer.out_dim;
            footprint.out_ch = layer.total_out_ch();
            if st.first {
                st.first = false;
                footprint.in_dim = layer.in_dim;
                footprint.in_ch = layer.in_ch;
            }
        }

        footprint.max_dim = footprint.max_dim.max(layer.in_dim).max(layer.out_dim);
        footprint.max_iterations = footprint.max_iterations.max(layer.iterations);
        footprint.max_split = footprint.max_split.max(layer.split);
        layer.in_split = st.split_mode;

        if add {
            layers.push(layer);
        }
    }

    let word = hw.word_bytes();
    footprint.max_buffer_size = hw.padded_map_bytes(footprint.max_dim);
    footprint.in_mem = hw.padded_map_bytes(footprint.in_dim);
    footprint.in_words = footprint.in_mem / word;
    footprint.out_mem = hw.padded_map_bytes(footprint.out_dim);
    footprint.out_words = footprint.out_mem / word;
    footprint.weight_banks = st.weight_index;
    (layers, footprint)
}

/// Fills the convolution geometry and weight footprint from a window record.
fn fill_window(layer: &mut LayerDescriptor, w: &WindowRecord, hw: &HardwareConfig) {
    layer.kernel_dim = w.kernel_shape;
    layer.stride = w.kernel_stride;
    layer.log2_stride = w.kernel_stride.ilog2() as usize;
    layer.ofm_ch = w.output[0];
    layer.ofm_dim = w.output[1];
    layer.ifm_ch = w.input[0];
    layer.ifm_dim = w.input[1];
    layer.padding = w.padding as usize;
    layer.padded_dim = layer.ifm_dim + 2 * layer.padding;
    fill_weight_memory(layer, hw);
    layer.pool_in_dim = layer.ofm_dim;
    layer.pool_out_dim = layer.ofm_dim;
    layer.pool_stride = 0;
    fold_iterations(layer, hw);

    layer.in_dim = layer.ifm_dim;
    layer.in_ch = layer.ifm_ch;
    layer.out_dim = layer.ofm_dim;
    layer.out_ch = layer.ofm_ch;
}

fn fill_fc(layer: &mut LayerDescriptor, input: usize, output: usize, hw: &HardwareConfig) {
    layer.kind |= LayerKind::FC;
    layer.hw_type = HardwareLayerType::Fc;
    layer.kernel_dim = 1;
    layer.stride = 1;
    layer.ifm_ch = input;
    layer.ifm_dim = 1;
    layer.ofm_ch = output;
    layer.ofm_dim = 1;
    layer.padded_dim = 1;
    fill_weight_memory(layer, hw);
    layer.pool_in_dim = 1;
    layer.pool_out_dim = 1;
    fold_iterations(layer, hw);

    layer.in_dim = 1;
    layer.in_ch = input;
    layer.out_dim = 1;
    layer.out_ch = layer.ofm_ch;
}

fn fill_weight_memory(layer: &mut LayerDescriptor, hw: &HardwareConfig) {
    layer.conv_w_mem = hw.conv_weight_words(layer.kernel_dim);
    layer.conv_t_mem = hw.conv_threshold_entries();
    layer.conv_mem_bits = hw.datawidth
        * hw.max_pe_conv
        * (layer.conv_w_mem + layer.conv_t_mem * hw.threshold_words());
    layer.conv_mem = layer.conv_mem_bits / hw.mem_channels / 8;
}

/// Splits output channels above `MAX_OFM_CH` into equal passes.
fn fold_iterations(layer: &mut LayerDescriptor, hw: &HardwareConfig) {
    layer.iterations = 1;
    if layer.ofm_ch > hw.max_ofm_ch {
        layer.iterations = layer.ofm_ch.div_ceil(hw.max_ofm_ch);
        layer.ofm_ch = layer.ofm_ch.div_ceil(layer.iterations);
    }
}

fn fold_pool(layer: &mut LayerDescriptor, pool: &WindowRecord) {
    layer.kind |= LayerKind::MAX_POOL;
    layer.hw_type = HardwareLayerType::ConvPool;
    layer.pool_in_dim = pool.input[1];
    layer.pool_out_dim = pool.output[1];
    layer.pool_stride = pool.kernel_stride.ilog2() as usize;
    layer.out_dim = pool.output[1];
    // Channels stay the conv's own: the pool record reports the total over
    // all iterations, which would count a folded conv twice.
    if pool.output[0] != layer.ofm_ch * layer.iterations {
        tracing::warn!(
            "pool after record {} declares {} channels, conv produces {}",
            layer.record,
            pool.output[0],
            layer.ofm_ch * layer.iterations
        );
    }
}

fn stamp_compute(layer: &mut LayerDescriptor, st: &mut DeriveState) {
    layer.weight_index = st.weight_index;
    st.weight_index += layer.iterations;
    if st.split_mode {
        layer.split = st.current_split;
        st.layers_in_split += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::tests::sample;
    use serde_json::json;

    fn doc(layers: serde_json::Value) -> LayerDocument {
        serde_json::from_value(json!({
            "network": "test",
            "input_image": "in.bin",
            "verification_image": "golden.bin",
            "use_binparams": false,
            "binparam": "params",
            "binparam_skip": 0,
            "layer_skip": 0,
            "layers": layers,
        }))
        .unwrap()
    }

    fn conv(in_ch: usize, out_ch: usize, in_dim: usize, out_dim: usize) -> serde_json::Value {
        json!({ "func": "conv_layer", "kernel_shape": 3, "kernel_stride": 1,
                "input": [in_ch, in_dim, in_dim], "output": [out_ch, out_dim, out_dim],
                "padding": 1 })
    }

    fn parse(layers: serde_json::Value) -> LayerGraph<Loaded> {
        LayerGraph::parse(&doc(layers), sample(), Path::new("/data/net")).unwrap()
    }

    #[test]
    fn test_single_conv() {
        let g = parse(json!([conv(3, 16, 8, 8)])).validate().unwrap();
        assert_eq!(g.len(), 1);
        let l = g.layer(0).unwrap();
        assert_eq!(l.kind, LayerKind::CONV);
        assert_eq!(l.hw_type, HardwareLayerType::Conv);
        assert_eq!(l.padded_dim, 10);
        assert_eq!(l.log2_stride, 0);
        assert_eq!(l.iterations, 1);
        assert_eq!(l.out_size, 96 * 64);
        assert_eq!(g.footprint.in_ch, 3);
        assert_eq!(g.footprint.out_ch, 16);
        assert_eq!(g.footprint.in_mem, 96 * 64);
        assert_eq!(g.footprint.out_words, 96 * 64 / 8);
    }

    #[test]
    fn test_weight_memory() {
        let g = parse(json!([conv(3, 16, 8, 8)]));
        let l = &g.layers[0];
        assert_eq!(l.conv_w_mem, 648);
        assert_eq!(l.conv_t_mem, 12);
        assert_eq!(l.conv_mem_bits, 64 * 32 * (648 + 12));
        assert_eq!(l.conv_mem, 64 * 32 * (648 + 12) / 2 / 8);
    }

    #[test]
    fn test_iteration_folding() {
        let g = parse(json!([conv(3, 600, 8, 8)]));
        let l = &g.layers[0];
        assert_eq!(l.iterations, 2);
        assert_eq!(l.out_ch, 300);
        assert_eq!(l.ofm_ch, 300);
        assert_eq!(g.footprint.max_iterations, 2);
        assert_eq!(g.footprint.out_ch, 600);
    }

    #[test]
    fn test_pool_is_folded() {
        let g = parse(json!([
            conv(3, 16, 8, 8),
            { "func": "maxpool_layer", "kernel_shape": 2, "kernel_stride": 2,
              "input": [16, 8, 8], "output": [16, 4, 4], "padding": 0 },
            conv(16, 32, 4, 4)
        ]))
        .validate()
        .unwrap();
        assert_eq!(g.len(), 2);
        let l = g.layer(0).unwrap();
        assert_eq!(l.kind, LayerKind::CONV | LayerKind::MAX_POOL);
        assert_eq!(l.hw_type, HardwareLayerType::ConvPool);
        assert_eq!(l.pool_in_dim, 8);
        assert_eq!(l.pool_out_dim, 4);
        assert_eq!(l.pool_stride, 1);
        assert_eq!(l.out_dim, 4);
        assert_eq!(g.layer(1).unwrap().weight_index, 1);
        assert_eq!(g.footprint.out_dim, 4);
    }

    #[test]
    fn test_pool_after_folded_conv_keeps_pass_channels() {
        let g = parse(json!([
            conv(3, 600, 8, 8),
            { "func": "maxpool_layer", "kernel_shape": 2, "kernel_stride": 2,
              "input": [600, 8, 8], "output": [600, 4, 4], "padding": 0 }
        ]));
        assert_eq!(g.layers.len(), 1);
        let l = &g.layers[0];
        assert!(l.kind.contains(LayerKind::MAX_POOL));
        assert_eq!(l.iterations, 2);
        assert_eq!(l.out_ch, 300);
        assert_eq!(l.out_dim, 4);
        assert_eq!(g.footprint.out_ch, 600);
    }

    #[test]
    fn test_split_region_weight_banks() {
        let g = parse(json!([
            conv(3, 16, 8, 8),
            { "func": "split_layer", "split": 2, "input_channels": 16, "input_dim": 8 },
            conv(8, 8, 8, 8),
            conv(8, 8, 8, 8),
            { "func": "merge_layer", "merge": 2, "output_channels": 16, "output_dim": 8 },
            conv(16, 16, 8, 8)
        ]))
        .validate()
        .unwrap();

        let split = g.layer(1).unwrap();
        assert_eq!(split.out_ch, 8);
        assert!(split.in_split);

        let a = g.layer(2).unwrap();
        let b = g.layer(3).unwrap();
        assert_eq!((a.weight_index, b.weight_index), (1, 2));
        assert_eq!((a.split, b.split), (2, 2));
        assert_eq!(a.slice_weight_stride, 2);
        // Slice 1 of the first conv comes after slice 0 of both.
        assert_eq!(a.weight_bank(1), 3);
        assert_eq!(b.weight_bank(1), 4);

        let merge = g.layer(4).unwrap();
        assert_eq!(merge.weight_index, 2);
        assert_eq!(merge.in_ch, 8);
        assert!(!merge.in_split);

        assert_eq!(g.layer(5).unwrap().weight_index, 5);
        assert_eq!(g.footprint.weight_banks, 6);
        assert_eq!(g.footprint.max_split, 2);
        assert_eq!(g.next_of_kind(2, LayerKind::MERGE), Some(4));
    }

    #[test]
    fn test_fc_layer() {
        let g = parse(json!([{ "func": "fc_layer", "input": 64, "output": 10 }]))
            .validate()
            .unwrap();
        let l = g.layer(0).unwrap();
        assert_eq!(l.kind, LayerKind::FC);
        assert_eq!(l.hw_type, HardwareLayerType::Fc);
        assert_eq!((l.in_ch, l.in_dim, l.out_ch, l.out_dim), (64, 1, 10, 1));
        assert_eq!(l.kernel_dim, 1);
    }

    #[test]
    fn test_max_dim_includes_pool() {
        let g = parse(json!([
            { "func": "maxpool_layer", "kernel_shape": 2, "kernel_stride": 2,
              "input": [16, 32, 32], "output": [16, 16, 16], "padding": 0 },
            conv(16, 16, 8, 8)
        ]));
        assert_eq!(g.layers.len(), 1);
        assert_eq!(g.footprint.max_dim, 32);
        assert_eq!(g.footprint.max_buffer_size, 96 * 32 * 32);
    }

    #[test]
    fn test_paths_resolved() {
        let g = parse(json!([conv(3, 16, 8, 8)]));
        assert_eq!(g.meta.input_image, Path::new("/data/net/in.bin"));
        assert_eq!(g.meta.binparam_dir, Path::new("/data/net/params"));
    }

    #[test]
    fn test_validate_empty() {
        assert!(parse(json!([])).validate().is_err());
    }

    #[test]
    fn test_validate_unclosed_split() {
        let g = parse(json!([
            { "func": "split_layer", "split": 2, "input_channels": 16, "input_dim": 8 },
            conv(8, 8, 8, 8)
        ]));
        assert!(matches!(g.validate(), Err(ModelError::InvalidGraph(_))));
    }

    #[test]
    fn test_validate_mismatched_merge() {
        let g = parse(json!([
            { "func": "split_layer", "split": 2, "input_channels": 16, "input_dim": 8 },
            conv(8, 8, 8, 8),
            { "func": "merge_layer", "merge": 4, "output_channels": 16, "output_dim": 8 }
        ]));
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_validate_iterations_in_split() {
        let g = parse(json!([
            { "func": "split_layer", "split": 2, "input_channels": 16, "input_dim": 8 },
            conv(8, 600, 8, 8),
            { "func": "merge_layer", "merge": 2, "output_channels": 16, "output_dim": 8 }
        ]));
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_validate_output_exceeds_pixel() {
        // 600 channels × 2 bits do not fit a 96-byte pixel.
        assert!(parse(json!([conv(3, 600, 8, 8)])).validate().is_err());
    }

    #[test]
    fn test_validate_kernel_too_large() {
        let g = parse(json!([
            { "func": "conv_layer", "kernel_shape": 7, "kernel_stride": 1,
              "input": [3, 8, 8], "output": [16, 8, 8], "padding": 3 }
        ]));
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_summary_and_display() {
        let g = parse(json!([conv(3, 16, 8, 8)])).validate().unwrap();
        assert!(g.summary().contains("Network 'test': 1 layers"));
        let display = format!("{g}");
        assert!(display.contains("LayerGraph 'test'"));
        assert!(display.contains("conv"));
    }
}
