// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end inference on the software backend.
//!
//! These tests exercise the complete flow from description files →
//! layer graph → weight banks → buffer reservation → batch execution,
//! proving that the five library crates compose correctly.

use dispatcher::{reference, BackendKind};
use model_ir::LayerKind;
use runtime::{RuntimeConfig, RuntimeContext, RuntimeError, Stage};
use std::path::{Path, PathBuf};
use tensor_core::{merge_channel_slice, split_channel_slice, ChannelSlice};

// ── Helpers ────────────────────────────────────────────────────

/// Capacities with 16 four-bit channels per pixel: one 64-bit word.
const NARROW: Capacities = Capacities {
    ifm_ch: 16,
    ofm_ch: 16,
    simd: 4,
    pe: 4,
    activation_bits: 4,
    thresholds_bits: 256,
};

/// Capacities for a conv wider than `MAX_OFM_CH`.
const WIDE: Capacities = Capacities {
    ifm_ch: 640,
    ofm_ch: 384,
    simd: 64,
    pe: 32,
    activation_bits: 2,
    thresholds_bits: 64,
};

struct Capacities {
    ifm_ch: usize,
    ofm_ch: usize,
    simd: usize,
    pe: usize,
    activation_bits: usize,
    thresholds_bits: usize,
}

fn network_json(c: &Capacities) -> String {
    format!(
        r#"{{"parameters": {{
            "MAX_K": 3, "MAX_IFM_CH": {}, "MAX_IFM_DIM": 8,
            "MAX_OFM_CH": {}, "MAX_OFM_DIM": 8,
            "MAX_POOL_SIZE": 2, "MAX_POOL_STRIDE": 2,
            "MAX_SIMD": {}, "MAX_PE_CONV": {}, "MAX_PE_FC": 2, "MEM_CHANNELS": 2,
            "ACTIVATION_BITS": {}, "WEIGHTS_BITS": 1, "THRESHOLDS_BITS": {},
            "MACC_BITS": 16, "DATAWIDTH": 64
        }}}}"#,
        c.ifm_ch, c.ofm_ch, c.simd, c.pe, c.activation_bits, c.thresholds_bits
    )
}

fn layers_json(use_binparams: bool, layers: &[String]) -> String {
    format!(
        r#"{{"network": "test", "input_image": "input.bin",
            "verification_image": "verification.bin",
            "use_binparams": {use_binparams}, "binparam": "params",
            "binparam_skip": 0, "layer_skip": 0, "layers": [{}]}}"#,
        layers.join(", ")
    )
}

fn conv(in_ch: usize, out_ch: usize) -> String {
    format!(
        r#"{{"func": "conv_layer", "kernel_shape": 3, "kernel_stride": 1,
            "input": [{in_ch}, 8, 8], "output": [{out_ch}, 8, 8], "padding": 1}}"#
    )
}

fn split(factor: usize, channels: usize) -> String {
    format!(r#"{{"func": "split_layer", "split": {factor}, "input_channels": {channels}, "input_dim": 8}}"#)
}

fn merge(factor: usize, channels: usize) -> String {
    format!(r#"{{"func": "merge_layer", "merge": {factor}, "output_channels": {channels}, "output_dim": 8}}"#)
}

/// Creates a fresh scratch directory holding `network.json` and `layers.json`.
fn scratch(name: &str, caps: &Capacities, layers: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qnn-it-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("network.json"), network_json(caps)).unwrap();
    std::fs::write(dir.join("layers.json"), layers).unwrap();
    dir
}

fn context(dir: &Path, batch: usize, threads: usize) -> RuntimeContext {
    let mut ctx = RuntimeContext::new(RuntimeConfig::default());
    ctx.init_parameters(batch, threads);
    ctx.init_accelerator(&dir.join("network.json"), &dir.join("layers.json"))
        .unwrap();
    ctx
}

/// 16-channel image whose two 8-channel halves differ pixel by pixel.
fn two_half_image(bytes: usize, seed: usize) -> Vec<u8> {
    let mut image = vec![0u8; bytes];
    for (p, pixel) in image.chunks_mut(8).enumerate() {
        if (p + seed) % 3 == 0 {
            pixel[..4].fill(0x21);
        }
        if (p + seed) % 5 == 0 {
            pixel[4..].fill(0x13);
        }
    }
    image
}

// ── Property tests ─────────────────────────────────────────────

#[test]
fn test_single_conv_output_size() {
    let dir = scratch("conv", &NARROW, &layers_json(false, &[conv(3, 16)]));
    let mut ctx = context(&dir, 1, 0);

    let fp = *ctx.footprint().unwrap();
    assert_eq!(fp.out_mem, 4 * 16 * 8 * 8 / 8);

    let input = vec![0u8; fp.in_mem];
    let mut output = vec![0u8; fp.out_mem];
    ctx.single_inference(&input, &mut output).unwrap();

    // Zero activations reach every zero threshold: all levels set.
    assert!(output.iter().all(|&b| b == 0xFF));
    assert_eq!(ctx.timings().unwrap().hits(Stage::Offload), 1);
}

#[test]
fn test_wide_conv_runs_in_two_iterations() {
    let dir = scratch("wide", &WIDE, &layers_json(false, &[conv(3, 600)]));
    let mut ctx = context(&dir, 1, 0);

    let graph = ctx.graph().unwrap();
    let layer = graph.layer(0).unwrap();
    assert_eq!(layer.iterations, 2);
    assert_eq!(layer.out_ch, 300);
    assert_eq!(graph.footprint.out_ch, 600);

    let fp = graph.footprint;
    let input = vec![0u8; fp.in_mem];
    let outputs = ctx.run_batch(&[&input]).unwrap();
    assert_eq!(outputs[0].len(), fp.out_mem);

    // 600 two-bit channels fill the first 150 bytes of each 160-byte pixel.
    for pixel in outputs[0].chunks(160) {
        assert!(pixel[..150].iter().all(|&b| b == 0xFF));
        assert!(pixel[150..].iter().all(|&b| b == 0));
    }
    let timings = ctx.timings().unwrap();
    assert_eq!(timings.hits(Stage::Concat), 2);
    assert_eq!(timings.hits(Stage::SwapCopy), 1);
}

#[test]
fn test_split_merge_restores_both_halves() {
    let layers = layers_json(false, &[split(2, 16), conv(8, 8), merge(2, 16)]);
    let dir = scratch("split", &NARROW, &layers);
    let mut ctx = context(&dir, 1, 0);

    let graph = ctx.graph().unwrap().clone();
    assert!(graph.layer(0).unwrap().kind.contains(LayerKind::SPLIT));
    let conv_layer = graph.layer(1).unwrap().clone();
    let layout = graph.hardware.channel_layout();
    let bytes = layout.map_bytes(8);

    let input = two_half_image(graph.footprint.in_mem, 0);
    let merged = ctx.run_batch(&[&input]).unwrap().remove(0);

    let mut expected = vec![0u8; bytes];
    for half in 0..2 {
        let mut slice_in = vec![0u8; bytes];
        split_channel_slice(&mut slice_in, &input, &layout, ChannelSlice::new(8, 8, half)).unwrap();
        let mut slice_out = vec![0u8; bytes];
        reference::run_layer(&graph.hardware, &conv_layer, None, &slice_in, &mut slice_out).unwrap();

        let mut region = vec![0u8; bytes];
        split_channel_slice(&mut region, &merged, &layout, ChannelSlice::new(8, 8, half)).unwrap();
        assert_eq!(region, slice_out, "half {half}");

        merge_channel_slice(&mut expected, &slice_out, &layout, ChannelSlice::new(8, 8, half)).unwrap();
    }
    assert_eq!(&merged[..bytes], &expected[..]);

    let timings = ctx.timings().unwrap();
    assert_eq!(timings.hits(Stage::Split), 1);
    assert_eq!(timings.hits(Stage::SplitCopy), 2);
    assert_eq!(timings.hits(Stage::Merge), 2);
}

#[test]
fn test_threaded_batch_matches_inline() {
    let layers = layers_json(false, &[split(2, 16), conv(8, 8), merge(2, 16), conv(16, 16)]);
    let dir = scratch("threads", &NARROW, &layers);
    let mut inline = context(&dir, 3, 0);
    let mut threaded = context(&dir, 3, 2);

    let in_mem = inline.footprint().unwrap().in_mem;
    let images: Vec<Vec<u8>> = (0..3).map(|seed| two_half_image(in_mem, seed)).collect();
    let refs: Vec<&[u8]> = images.iter().map(Vec::as_slice).collect();

    let expected = inline.run_batch(&refs).unwrap();
    for _ in 0..3 {
        assert_eq!(threaded.run_batch(&refs).unwrap(), expected);
    }
    // A partial batch is fine.
    assert_eq!(threaded.run_batch(&refs[..1]).unwrap()[0], expected[0]);
}

// ── Entry points ───────────────────────────────────────────────

#[test]
fn test_single_inference_repacks_mismatched_sizes() {
    let dir = scratch("repack", &NARROW, &layers_json(false, &[conv(3, 16)]));
    let mut ctx = context(&dir, 1, 0);

    // One byte per pixel in, one byte per pixel out.
    let input = vec![0u8; 64];
    let mut output = vec![0u8; 64];
    ctx.single_inference(&input, &mut output).unwrap();
    assert!(output.iter().all(|&b| b == 0xFF));
}

#[test]
fn test_deinit_is_idempotent() {
    let dir = scratch("deinit", &NARROW, &layers_json(false, &[conv(3, 16)]));
    let mut ctx = context(&dir, 2, 2);
    assert!(ctx.is_initialised());

    ctx.deinit();
    ctx.deinit();
    assert!(!ctx.is_initialised());

    let mut output = vec![0u8; 512];
    assert!(matches!(
        ctx.single_inference(&[0u8; 512], &mut output),
        Err(RuntimeError::NotInitialised(_))
    ));

    // Parameters apply again once torn down.
    ctx.init_parameters(4, 0);
    assert_eq!(ctx.config().batch, 4);
}

#[test]
fn test_config_file_drives_initialisation() {
    let dir = scratch("config", &NARROW, &layers_json(false, &[conv(3, 16)]));
    let toml = format!(
        "network = {:?}\nlayers = {:?}\nbatch = 2\nthreads = 1\nbackend = \"software\"\n",
        dir.join("network.json"),
        dir.join("layers.json"),
    );
    std::fs::write(dir.join("runtime.toml"), toml).unwrap();

    let config = RuntimeConfig::from_file(&dir.join("runtime.toml")).unwrap();
    assert_eq!(config.batch, 2);
    assert_eq!(config.backend, BackendKind::Software);

    let mut ctx = RuntimeContext::new(config);
    ctx.init_from_config().unwrap();
    let in_mem = ctx.footprint().unwrap().in_mem;
    let image = vec![0u8; in_mem];
    assert_eq!(ctx.run_batch(&[&image, &image]).unwrap().len(), 2);
}

#[test]
fn test_bundle_without_bitstream() {
    let dir = scratch("bundle", &NARROW, &layers_json(false, &[conv(3, 16)]));
    let mut ctx = RuntimeContext::new(RuntimeConfig::default());
    ctx.init_accelerator_bundle(&dir).unwrap();
    assert!(ctx.is_initialised());
    assert_eq!(ctx.graph().unwrap().meta.name, "test");
}

#[test]
fn test_bundle_bitstream_goes_to_fpga_manager() {
    let dir = scratch("bitstream", &NARROW, &layers_json(false, &[conv(3, 16)]));
    std::fs::write(dir.join("bitstream"), b"\x00\x09\x0f\xf0").unwrap();
    let firmware = dir.join("firmware");
    std::fs::create_dir_all(&firmware).unwrap();

    let mut config = RuntimeConfig {
        backend: BackendKind::Hardware,
        firmware_dir: firmware.clone(),
        fpga_manager: dir.join("fpga0-firmware"),
        ..RuntimeConfig::default()
    };
    config.device.memory_device = dir.join("no-such-mem");
    let mut ctx = RuntimeContext::new(config);

    // The image is programmed before the (absent) device is opened.
    let err = ctx.init_accelerator_bundle(&dir).unwrap_err();
    assert!(matches!(err, RuntimeError::Dispatch(_)));
    assert_eq!(std::fs::read(firmware.join("bitstream")).unwrap(), b"\x00\x09\x0f\xf0");
    assert_eq!(std::fs::read_to_string(dir.join("fpga0-firmware")).unwrap(), "bitstream");
    assert!(!ctx.is_initialised());
}

#[test]
fn test_missing_parameter_files_are_fatal() {
    let dir = scratch("params", &NARROW, &layers_json(true, &[conv(3, 16)]));
    let mut ctx = RuntimeContext::new(RuntimeConfig::default());
    let err = ctx
        .init_accelerator(&dir.join("network.json"), &dir.join("layers.json"))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::WeightLoadError { .. }));
}

#[test]
fn test_malformed_layer_rejected_before_start() {
    let layers = layers_json(false, &[r#"{"func": "split_layer", "split": 0, "input_channels": 16, "input_dim": 8}"#.into()]);
    let dir = scratch("malformed", &NARROW, &layers);
    let mut ctx = RuntimeContext::new(RuntimeConfig::default());
    let err = ctx
        .init_accelerator(&dir.join("network.json"), &dir.join("layers.json"))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Model(_)));
    assert!(!ctx.is_initialised());
}
