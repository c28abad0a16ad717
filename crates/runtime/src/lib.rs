// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The host-side engine that runs quantized networks on the accelerator.
//!
//! The runtime takes:
//! - A validated `LayerGraph` from `model-ir`.
//! - A `Dispatcher` backend from `dispatcher`.
//! - A `BufferPool` from `memory-manager`.
//!
//! And runs batches of images layer by layer, loading weight banks,
//! re-packing activations between layers on a small worker pool, and
//! accumulating per-stage timings.
//!
//! # Type-State Pipeline
//! ```text
//! InferenceEngine<Idle> → InferenceEngine<Loaded> → InferenceEngine<Ready>
//! ```
//! Transitions are compile-time checked. [`RuntimeContext`] wraps the
//! pipeline behind the process-level entry points.
//!
//! # Concurrency
//! One coordinator thread drives the accelerator. Re-packing jobs run on a
//! fixed set of OS worker threads, or inline when the pool has none, and
//! the coordinator executes queued jobs itself while the accelerator is
//! busy.

mod config;
mod context;
mod engine;
mod error;
mod metrics;
mod task_pool;
mod weight_loader;

pub use config::{RuntimeConfig, ENV_LAYERS_JSON, ENV_NETWORK_JSON};
pub use context::RuntimeContext;
pub use engine::{EngineState, Idle, InferenceEngine, Loaded, Ready};
pub use error::RuntimeError;
pub use metrics::{Stage, StageTime, StageTimings, TimingReport};
pub use task_pool::TaskPool;
pub use weight_loader::WeightLoader;
