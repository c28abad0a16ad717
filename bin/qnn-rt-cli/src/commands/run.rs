// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `qnn-rt run` command: run images through the network and verify them.
//!
//! ```text
//! RuntimeContext::new → init_parameters → init_from_config
//!     → run_batch × ⌈images / batch⌉ → verify → report
//! ```
//!
//! Ctrl-C releases the accelerator through `RuntimeContext::deinit`
//! before the process exits.

use anyhow::Context;
use runtime::{RuntimeConfig, RuntimeContext, TimingReport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Exit status after an interrupt.
const INTERRUPTED: i32 = 130;

struct Outcome {
    images: usize,
    verified: usize,
    passed: usize,
    mismatched_pixels: usize,
    elapsed: Duration,
    timings: TimingReport,
}

pub async fn execute(
    config: RuntimeConfig,
    images: usize,
    batch: usize,
    threads: usize,
) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             qnn-rt · Inference Testbench             ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let mut ctx = RuntimeContext::new(config);
    ctx.init_parameters(batch, threads);

    println!("  Config:");
    println!("   Backend:  {}", ctx.config().backend);
    println!("   Batch:    {}", ctx.config().batch);
    println!("   Threads:  {}", ctx.config().threads);
    println!("   Images:   {images}");
    println!();

    println!("  [1/2] Initialising accelerator...");
    ctx.init_from_config().context("accelerator initialisation failed")?;
    println!("        {}", ctx.graph()?.summary());
    println!();

    let ctx = Arc::new(Mutex::new(ctx));
    let signal_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Interrupted, releasing the accelerator.");
            lock(&signal_ctx).deinit();
            std::process::exit(INTERRUPTED);
        }
    });

    println!("  [2/2] Running {images} images...");
    let worker_ctx = Arc::clone(&ctx);
    let outcome = tokio::task::spawn_blocking(move || run_images(&worker_ctx, images)).await??;
    lock(&ctx).deinit();

    println!();
    print_results(&outcome);
    outcome.check()
}

fn lock(ctx: &Mutex<RuntimeContext>) -> MutexGuard<'_, RuntimeContext> {
    ctx.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Outcome {
    /// Fails when any verified image differed from its golden output.
    fn check(&self) -> anyhow::Result<()> {
        let failed = self.verified - self.passed;
        if failed > 0 {
            anyhow::bail!("{failed} of {} images failed verification", self.verified);
        }
        Ok(())
    }
}

/// Re-packs a file that is not a whole number of `size`-byte maps as one
/// unpadded map of `dim²` elements.
fn repack(data: Vec<u8>, size: usize, dim: usize, what: &str) -> anyhow::Result<Vec<u8>> {
    if size == 0 || (data.len() >= size && data.len() % size == 0) {
        return Ok(data);
    }
    tracing::info!("{what} holds {} bytes, re-packing into {size}", data.len());
    let mut buf = vec![0u8; size];
    tensor_core::pad_or_truncate(&mut buf, &data, dim * dim)
        .with_context(|| format!("cannot re-pack {what}"))?;
    Ok(buf)
}

/// Splits `data` into `size`-byte images when it holds a whole number of
/// them, otherwise treats it as one image.
fn images_in(data: &[u8], size: usize) -> Vec<&[u8]> {
    if size > 0 && data.len() >= size && data.len() % size == 0 {
        data.chunks_exact(size).collect()
    } else {
        vec![data]
    }
}

fn run_images(ctx: &Mutex<RuntimeContext>, images: usize) -> anyhow::Result<Outcome> {
    let (input, golden, batch, layout, fp) = {
        let ctx = lock(ctx);
        let graph = ctx.graph()?;
        let input = std::fs::read(&graph.meta.input_image).with_context(|| {
            format!("cannot read input image {}", graph.meta.input_image.display())
        })?;
        let golden = match std::fs::read(&graph.meta.verification_image) {
            Ok(bytes) if bytes.is_empty() => {
                tracing::warn!(
                    "verification image {} is empty, skipping verification",
                    graph.meta.verification_image.display()
                );
                None
            }
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(
                    "no verification image at {}: {e}",
                    graph.meta.verification_image.display()
                );
                None
            }
        };
        (
            input,
            golden,
            ctx.config().batch,
            graph.hardware.channel_layout(),
            graph.footprint,
        )
    };
    let input = repack(input, fp.in_mem, fp.in_dim, "input image")?;
    let golden = golden
        .map(|g| repack(g, fp.out_mem, fp.out_dim, "verification image"))
        .transpose()?;
    let inputs = images_in(&input, fp.in_mem);
    let goldens = golden.as_deref().map(|g| images_in(g, fp.out_mem));

    let mut outcome = Outcome {
        images,
        verified: 0,
        passed: 0,
        mismatched_pixels: 0,
        elapsed: Duration::ZERO,
        timings: TimingReport { stages: Vec::new() },
    };
    let start = Instant::now();
    let mut done = 0;
    while done < images {
        let n = batch.min(images - done);
        let refs: Vec<&[u8]> = (done..done + n).map(|i| inputs[i % inputs.len()]).collect();
        let outputs = lock(ctx).run_batch(&refs)?;

        if let Some(goldens) = &goldens {
            for (k, output) in outputs.iter().enumerate() {
                let golden = goldens[(done + k) % goldens.len()];
                outcome.verified += 1;
                match tensor_core::verify(golden, output, &layout, fp.out_ch, fp.out_dim) {
                    Ok(report) if report.passed() => outcome.passed += 1,
                    Ok(report) => {
                        outcome.mismatched_pixels += report.mismatched_pixels;
                        tracing::debug!(
                            "image {}: {} of {} pixels differ",
                            done + k,
                            report.mismatched_pixels,
                            report.pixels
                        );
                    }
                    Err(e) => tracing::warn!("image {} not comparable: {e}", done + k),
                }
            }
        }
        done += n;
    }
    outcome.elapsed = start.elapsed();
    outcome.timings = lock(ctx).timings()?.report();
    Ok(outcome)
}

fn print_results(outcome: &Outcome) {
    let secs = outcome.elapsed.as_secs_f64();
    println!("  Results:");
    println!("   Images:      {}", outcome.images);
    println!("   Elapsed:     {:.3} s", secs);
    if secs > 0.0 {
        println!("   Throughput:  {:.1} images/s", outcome.images as f64 / secs);
    }
    if outcome.verified > 0 {
        println!(
            "   Accuracy:    {}/{} ({:.1}%)",
            outcome.passed,
            outcome.verified,
            100.0 * outcome.passed as f64 / outcome.verified as f64
        );
        println!("   Mismatched:  {} pixels", outcome.mismatched_pixels);
    } else {
        println!("   Accuracy:    not verified");
    }
    println!();
    for line in outcome.timings.summary().lines() {
        println!("  {line}");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// 16 four-bit channels per pixel: one 64-bit word, 512-byte maps.
    const NETWORK_JSON: &str = r#"{
        "parameters": {
            "MAX_K": 3, "MAX_IFM_CH": 16, "MAX_IFM_DIM": 8,
            "MAX_OFM_CH": 16, "MAX_OFM_DIM": 8,
            "MAX_POOL_SIZE": 2, "MAX_POOL_STRIDE": 2,
            "MAX_SIMD": 4, "MAX_PE_CONV": 4, "MAX_PE_FC": 2, "MEM_CHANNELS": 2,
            "ACTIVATION_BITS": 4, "WEIGHTS_BITS": 1, "THRESHOLDS_BITS": 256,
            "MACC_BITS": 16, "DATAWIDTH": 64
        }
    }"#;

    const LAYERS_JSON: &str = r#"{
        "network": "testbench", "input_image": "input.bin",
        "verification_image": "verification.bin",
        "use_binparams": false, "binparam": "params",
        "binparam_skip": 0, "layer_skip": 0,
        "layers": [{"func": "conv_layer", "kernel_shape": 3, "kernel_stride": 1,
                    "input": [3, 8, 8], "output": [16, 8, 8], "padding": 1}]
    }"#;

    const MAP: usize = 512;

    fn scratch(name: &str, input: &[u8], golden: Option<&[u8]>) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qnn-cli-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("network.json"), NETWORK_JSON).unwrap();
        std::fs::write(dir.join("layers.json"), LAYERS_JSON).unwrap();
        std::fs::write(dir.join("input.bin"), input).unwrap();
        if let Some(golden) = golden {
            std::fs::write(dir.join("verification.bin"), golden).unwrap();
        }
        dir
    }

    fn context(dir: &std::path::Path, batch: usize) -> RuntimeContext {
        let mut ctx = RuntimeContext::new(RuntimeConfig::default());
        ctx.init_parameters(batch, 0);
        ctx.init_accelerator(&dir.join("network.json"), &dir.join("layers.json"))
            .unwrap();
        ctx
    }

    #[test]
    fn test_repack_places_unpadded_pixels() {
        let unpadded: Vec<u8> = (1..=64).collect();
        let packed = repack(unpadded, MAP, 8, "input image").unwrap();
        assert_eq!(packed.len(), MAP);
        for (p, pixel) in packed.chunks(8).enumerate() {
            assert_eq!(pixel[0] as usize, p + 1);
            assert!(pixel[1..].iter().all(|&b| b == 0));
        }

        let whole = vec![7u8; 2 * MAP];
        assert_eq!(repack(whole.clone(), MAP, 8, "input image").unwrap(), whole);
    }

    #[test]
    fn test_unpadded_input_runs_like_single_inference() {
        let unpadded: Vec<u8> = (0..64u32).map(|p| (p * 37 % 251) as u8).collect();
        let dir = scratch("unpadded", &unpadded, None);
        let mut ctx = context(&dir, 2);

        let mut expected = vec![0u8; MAP];
        ctx.single_inference(&unpadded, &mut expected).unwrap();
        std::fs::write(dir.join("verification.bin"), &expected).unwrap();

        let outcome = run_images(&Mutex::new(ctx), 3).unwrap();
        assert_eq!(outcome.images, 3);
        assert_eq!(outcome.verified, 3);
        assert_eq!(outcome.passed, 3);
        assert_eq!(outcome.mismatched_pixels, 0);
        assert!(outcome.check().is_ok());
    }

    #[test]
    fn test_goldens_cycle_and_failures_are_counted() {
        // Zero activations set every output level; the second golden is wrong.
        let mut golden = vec![0xFFu8; MAP];
        golden.resize(2 * MAP, 0);
        let dir = scratch("cycle", &[0u8; MAP], Some(&golden[..]));
        let ctx = context(&dir, 2);

        let outcome = run_images(&Mutex::new(ctx), 4).unwrap();
        assert_eq!(outcome.verified, 4);
        assert_eq!(outcome.passed, 2);
        assert_eq!(outcome.mismatched_pixels, 2 * 64);
        let err = outcome.check().unwrap_err();
        assert!(err.to_string().contains("2 of 4"));
    }

    #[test]
    fn test_short_golden_is_compared_not_fatal() {
        let dir = scratch("short-golden", &[0u8; MAP], Some(&[0xFFu8; 64][..]));
        let ctx = context(&dir, 1);

        let outcome = run_images(&Mutex::new(ctx), 2).unwrap();
        assert_eq!(outcome.verified, 2);
        assert_eq!(outcome.passed, 0);
        assert!(outcome.check().is_err());
    }

    #[test]
    fn test_empty_or_missing_golden_skips_verification() {
        let dir = scratch("empty-golden", &[0u8; MAP], Some(&[0u8; 0][..]));
        let outcome = run_images(&Mutex::new(context(&dir, 1)), 2).unwrap();
        assert_eq!(outcome.verified, 0);
        assert!(outcome.check().is_ok());

        let dir = scratch("no-golden", &[0u8; MAP], None);
        let outcome = run_images(&Mutex::new(context(&dir, 1)), 2).unwrap();
        assert_eq!(outcome.verified, 0);
    }

    #[test]
    fn test_images_in_splits_whole_multiples() {
        let data = [1u8, 2, 3, 4, 5, 6];
        assert_eq!(images_in(&data, 2).len(), 3);
        assert_eq!(images_in(&data, 4), vec![&data[..]]);
        assert_eq!(images_in(&data, 0).len(), 1);
        assert_eq!(images_in(&data[..1], 2), vec![&data[..1]]);
    }
}
