// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `qnn-rt inspect` command: display the hardware capacities and the
//! derived layer graph.

use model_ir::{graph::Validated, LayerGraph, NetworkLoader};
use runtime::RuntimeConfig;

pub fn execute(config: &RuntimeConfig, json: bool) -> anyhow::Result<()> {
    let graph = load(config)?;

    if json {
        let doc = serde_json::json!({
            "network": graph.meta,
            "hardware": graph.hardware,
            "footprint": graph.footprint,
            "layers": graph.layers,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              qnn-rt · Network Inspector              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Hardware ───────────────────────────────────────────────
    let hw = &graph.hardware;
    println!("  Hardware:");
    for line in hw.to_string().lines() {
        println!("   {line}");
    }
    println!(
        "   Pixel: {} B, word: {} B, {} PEs per memory channel",
        hw.channel_layout().pixel_stride(),
        hw.word_bytes(),
        hw.pe_per_channel(),
    );
    println!();

    // ── Footprint ──────────────────────────────────────────────
    let f = &graph.footprint;
    println!("  Network '{}':", graph.meta.name);
    println!("   Input:         {}ch × {}px, {} B", f.in_ch, f.in_dim, f.in_mem);
    println!("   Output:        {}ch × {}px, {} B", f.out_ch, f.out_dim, f.out_mem);
    println!("   Buffer size:   {} B", f.max_buffer_size);
    println!("   Iterations:    up to {}", f.max_iterations);
    println!("   Split factor:  up to {}", f.max_split);
    println!("   Weight banks:  {}", f.weight_banks);
    if graph.meta.use_binparams {
        println!(
            "   Parameters:    {} (skip {})",
            graph.meta.binparam_dir.display(),
            graph.meta.binparam_skip
        );
    } else {
        println!("   Parameters:    resident in the bitstream");
    }
    println!();

    // ── Per-Layer Detail ───────────────────────────────────────
    println!(
        "  {:<4} {:<14} {:>6} {:>5} {:>6} {:>5} {:>3} {:>5} {:>5}",
        "Pos", "Kind", "In ch", "dim", "Out ch", "dim", "k", "iter", "bank",
    );
    println!("  {}", "-".repeat(62));
    for (pos, layer) in graph.iter_layers().enumerate() {
        println!(
            "  {:<4} {:<14} {:>6} {:>5} {:>6} {:>5} {:>3} {:>5} {:>5}",
            pos,
            layer.kind.to_string(),
            layer.in_ch,
            layer.in_dim,
            layer.total_out_ch(),
            layer.out_dim,
            layer.kernel_dim,
            layer.iterations,
            layer.weight_index,
        );
    }
    println!();
    Ok(())
}

fn load(config: &RuntimeConfig) -> anyhow::Result<LayerGraph<Validated>> {
    if let Some(bundle) = &config.bundle {
        return Ok(NetworkLoader::load_bundle(bundle)?.graph);
    }
    match (&config.network, &config.layers) {
        (Some(network), Some(layers)) => Ok(NetworkLoader::load(network, layers)?),
        _ => anyhow::bail!("pass --bundle, or --network and --layers"),
    }
}
