// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # qnn-rt
//!
//! Testbench for the quantized accelerator runtime.
//!
//! ## Usage
//! ```bash
//! # Run 100 images in batches of 4 with 2 worker threads
//! qnn-rt run -n ./cnv/network.json -l ./cnv/layers.json -i 100 -b 4 -t 2
//!
//! # Run a packaged bundle on the accelerator
//! qnn-rt run -z ./cnv-bundle --backend hardware
//!
//! # Inspect the derived layer graph
//! qnn-rt inspect -n ./cnv/network.json -l ./cnv/layers.json
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "qnn-rt",
    about = "Host runtime and testbench for a quantized neural network accelerator",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file (CLI arguments override it).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Where the network comes from.
#[derive(clap::Args, Debug, Clone)]
pub struct NetworkArgs {
    /// Network description (hardware capacities).
    #[arg(short, long, env = runtime::ENV_NETWORK_JSON)]
    network: Option<PathBuf>,

    /// Layer description.
    #[arg(short, long, env = runtime::ENV_LAYERS_JSON)]
    layers: Option<PathBuf>,

    /// Bundle directory with network.json, layers.json and a bitstream.
    /// Takes precedence over the two document paths.
    #[arg(short = 'z', long)]
    bundle: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run images through the network and verify the results.
    Run {
        #[command(flatten)]
        network: NetworkArgs,

        /// Number of images to run.
        #[arg(short, long, default_value_t = 1)]
        images: usize,

        /// Images per batch.
        #[arg(short, long)]
        batch: Option<usize>,

        /// Worker threads (0 runs every job inline).
        #[arg(short, long)]
        threads: Option<usize>,

        /// Execution backend: software or hardware.
        #[arg(long)]
        backend: Option<dispatcher::BackendKind>,
    },

    /// Print the hardware capacities and the derived layer graph.
    Inspect {
        #[command(flatten)]
        network: NetworkArgs,

        /// Print the graph as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => runtime::RuntimeConfig::from_file(path)?,
        None => runtime::RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Run {
            network,
            images,
            batch,
            threads,
            backend,
        } => {
            network.apply(&mut config);
            if let Some(backend) = backend {
                config.backend = backend;
            }
            let batch = batch.unwrap_or(config.batch);
            let threads = threads.unwrap_or(config.threads);
            commands::run::execute(config, images, batch, threads).await
        }
        Commands::Inspect { network, json } => {
            network.apply(&mut config);
            commands::inspect::execute(&config, json)
        }
    }
}

impl NetworkArgs {
    /// Overrides the configured document paths with the given ones, then
    /// falls back to the environment.
    fn apply(self, config: &mut runtime::RuntimeConfig) {
        if self.bundle.is_some() {
            config.bundle = self.bundle;
        }
        if self.network.is_some() {
            config.network = self.network;
        }
        if self.layers.is_some() {
            config.layers = self.layers;
        }
        config.apply_env();
    }
}
