// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The batch inference engine with type-state–enforced setup.
//!
//! ```text
//! InferenceEngine<Idle>
//!     │  .load(graph, dispatcher)     weight banks installed
//!     ▼
//! InferenceEngine<Loaded>
//!     │  .prepare()                   buffers reserved, workers started
//!     ▼
//! InferenceEngine<Ready>
//!     │  .run_batch(images)
//!     ▼
//!   Vec<Vec<u8>>
//! ```
//!
//! # Layer walk
//!
//! A batch walks the layer sequence once, except inside split regions,
//! which are replayed once per slice:
//!
//! ```text
//!            ┌──────────── merge, index + 1 < factor ────────────┐
//!            ▼                                                   │
//! Normal ─ split ─► InSplit{index, offset} ─ conv … ─► merge ────┘
//!   ▲                                                   │
//!   └──────────────── merge, all slices seen ───────────┘
//! ```
//!
//! Every batch slot owns a hardware *working* buffer. Repacking (split,
//! concat, merge) runs as task-pool jobs; a job that will rewrite a
//! working buffer raises its pending count first and arrives when done,
//! and the coordinator waits for the count to settle before reading the
//! buffer again.

use crate::metrics::{Stage, StageTimings};
use crate::{RuntimeConfig, RuntimeError, TaskPool, WeightLoader};
use dispatcher::{BackendKind, Dispatcher};
use memory_manager::{lock_pair, BufferKind, BufferPool, PoolConfig, PoolStats, PooledBuffer};
use model_ir::{graph::Validated, GraphFootprint, LayerDescriptor, LayerGraph, LayerKind};
use std::sync::{Arc, Mutex, PoisonError};
use tensor_core::{
    concat_iteration_slice, merge_channel_slice, split_channel_slice, ChannelLayout, ChannelSlice,
};

// ── Type-state markers ─────────────────────────────────────────

/// Engine is created but no network is loaded.
#[derive(Debug)]
pub struct Idle;

/// Network and weights are loaded into the dispatcher.
#[derive(Debug)]
pub struct Loaded {
    graph: LayerGraph<Validated>,
    dispatcher: Box<dyn Dispatcher>,
}

/// Buffers are reserved and workers are running.
#[derive(Debug)]
pub struct Ready {
    graph: LayerGraph<Validated>,
    dispatcher: Box<dyn Dispatcher>,
    pool: BufferPool,
    tasks: TaskPool,
    /// Weight bank currently loaded in the accelerator.
    loaded_bank: Option<usize>,
}

/// Sealed trait for engine states.
pub trait EngineState: std::fmt::Debug {}
impl EngineState for Idle {}
impl EngineState for Loaded {}
impl EngineState for Ready {}

// ── Engine ─────────────────────────────────────────────────────

/// The primary inference engine.
///
/// `S` is a type-state marker: a batch can only run on an engine whose
/// weights are loaded and buffers reserved.
///
/// # Example
/// ```no_run
/// use dispatcher::SoftwareBackend;
/// use model_ir::NetworkLoader;
/// use runtime::{InferenceEngine, RuntimeConfig};
/// use std::path::Path;
///
/// # fn example() -> Result<(), runtime::RuntimeError> {
/// let graph = NetworkLoader::load(Path::new("network.json"), Path::new("layers.json"))?;
/// let backend = Box::new(SoftwareBackend::new(graph.hardware));
/// let mut engine = InferenceEngine::new(RuntimeConfig::default())
///     .load(graph, backend)?
///     .prepare()?;
/// let image = vec![0u8; engine.footprint().in_mem];
/// let outputs = engine.run_batch(&[&image])?;
/// # Ok(())
/// # }
/// ```
pub struct InferenceEngine<S: EngineState = Idle> {
    config: RuntimeConfig,
    timings: Arc<StageTimings>,
    state: S,
}

// ── Idle → Loaded ──────────────────────────────────────────────

impl InferenceEngine<Idle> {
    /// Creates a new engine from the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::info!(
            "engine created: batch {}, {} worker threads",
            config.batch.max(1),
            config.threads
        );
        Self {
            timings: Arc::new(StageTimings::new(config.enable_profiling)),
            config,
            state: Idle,
        }
    }

    /// Installs the graph's weight banks into `dispatcher`.
    /// Transitions to the `Loaded` state.
    pub fn load(
        self,
        graph: LayerGraph<Validated>,
        mut dispatcher: Box<dyn Dispatcher>,
    ) -> Result<InferenceEngine<Loaded>, RuntimeError> {
        match WeightLoader::for_graph(&graph) {
            Some(loader) => {
                loader.load_graph(&graph, dispatcher.as_mut())?;
            }
            None => tracing::info!("parameter files disabled, using resident weights"),
        }
        Ok(InferenceEngine {
            config: self.config,
            timings: self.timings,
            state: Loaded { graph, dispatcher },
        })
    }
}

// ── Loaded → Ready ─────────────────────────────────────────────

impl InferenceEngine<Loaded> {
    pub fn graph(&self) -> &LayerGraph<Validated> {
        &self.state.graph
    }

    /// Reserves every buffer a batch needs and starts the workers.
    /// Transitions to the `Ready` state.
    ///
    /// Hardware buffers: one working buffer per slot plus two outputs in
    /// flight, and one more per slot when jobs run on workers. Local
    /// buffers: concat accumulators, split slices and merge accumulators
    /// when the graph needs them, plus one per slot.
    pub fn prepare(self) -> Result<InferenceEngine<Ready>, RuntimeError> {
        let Loaded { graph, dispatcher } = self.state;
        let batch = self.config.batch.max(1);
        let threads = self.config.threads;
        let fp = graph.footprint;

        let pool = BufferPool::new(
            PoolConfig::new(fp.max_buffer_size)
                .with_acquire_timeout(self.config.acquire_timeout())
                .with_max_buffers(self.config.max_buffers),
            dispatcher.allocator(),
        );

        let hardware = batch + 2 + if threads > 0 { batch } else { 0 };
        let mut local = batch;
        if fp.max_iterations > 1 {
            local += batch;
        }
        if fp.max_split > 1 {
            local += batch + batch * fp.max_split;
        }
        for (kind, wanted) in [(BufferKind::Hardware, hardware), (BufferKind::Local, local)] {
            let got = pool.reserve(wanted, kind);
            if got < wanted {
                return Err(memory_manager::MemoryError::AllocationFailed {
                    kind,
                    bytes: fp.max_buffer_size,
                    detail: format!("reserved {got} of {wanted} buffers"),
                }
                .into());
            }
        }
        tracing::info!(
            "reserved {hardware} hardware and {local} local buffers of {} bytes",
            fp.max_buffer_size
        );

        Ok(InferenceEngine {
            config: self.config,
            timings: self.timings,
            state: Ready {
                graph,
                dispatcher,
                pool,
                tasks: TaskPool::new(threads),
                loaded_bank: None,
            },
        })
    }
}

// ── Ready: run batches ─────────────────────────────────────────

impl InferenceEngine<Ready> {
    pub fn graph(&self) -> &LayerGraph<Validated> {
        &self.state.graph
    }

    pub fn footprint(&self) -> &GraphFootprint {
        &self.state.graph.footprint
    }

    /// Images per batch.
    pub fn batch(&self) -> usize {
        self.config.batch.max(1)
    }

    pub fn backend(&self) -> BackendKind {
        self.state.dispatcher.kind()
    }

    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.state.pool.stats()
    }

    /// Runs up to [`batch`](Self::batch) images through the network.
    ///
    /// Each image must fit one buffer; it is copied to the start of its
    /// working buffer and the rest is zeroed. Returns `out_mem` bytes per
    /// image.
    pub fn run_batch(&mut self, images: &[&[u8]]) -> Result<Vec<Vec<u8>>, RuntimeError> {
        let batch = self.batch();
        if images.is_empty() || images.len() > batch {
            return Err(RuntimeError::SizeMismatch {
                what: "images per batch",
                expected: batch,
                actual: images.len(),
            });
        }

        let Ready {
            graph,
            dispatcher,
            pool,
            tasks,
            loaded_bank,
        } = &mut self.state;
        let out_mem = graph.footprint.out_mem;
        let mut run = BatchRun {
            layout: graph.hardware.channel_layout(),
            graph,
            dispatcher,
            pool,
            tasks,
            loaded_bank,
            timings: Arc::clone(&self.timings),
            failure: FailureSlot::default(),
            asynchronous: self.config.threads > 0,
        };

        let mut slots = Vec::with_capacity(images.len());
        let walked = run
            .stage_inputs(&mut slots, images)
            .and_then(|()| run.walk(&mut slots));
        if walked.is_err() {
            if let Err(e) = run.dispatcher.sync() {
                tracing::warn!("sync after failed batch: {e}");
            }
        }
        run.tasks.drain_and_wait();
        walked?;
        if let Some(detail) = run.failure.take() {
            return Err(RuntimeError::JobFailed(detail));
        }
        run.collect(&slots, out_mem)
    }
}

impl<S: EngineState> std::fmt::Debug for InferenceEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &std::any::type_name::<S>())
            .field("batch", &self.config.batch)
            .field("threads", &self.config.threads)
            .field("backend", &self.config.backend)
            .finish()
    }
}

// ── Batch execution ────────────────────────────────────────────

/// Where the walk is relative to split regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Normal,
    /// Replaying the region that starts at `split_pos` for slice `index`;
    /// `offset` is added to every weight bank in the region.
    InSplit {
        split_pos: usize,
        index: usize,
        offset: usize,
    },
}

/// First error raised by a background job.
#[derive(Debug, Clone, Default)]
struct FailureSlot(Arc<Mutex<Option<String>>>);

impl FailureSlot {
    fn record(&self, result: Result<(), RuntimeError>) {
        if let Err(e) = result {
            tracing::error!("background job failed: {e}");
            let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(e.to_string());
            }
        }
    }

    fn take(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Buffers owned by one image of the batch.
struct Slot {
    working: PooledBuffer,
    split: Option<Arc<Vec<PooledBuffer>>>,
    merge: Option<Arc<PooledBuffer>>,
    concat: Option<Arc<PooledBuffer>>,
}

struct BatchRun<'a> {
    graph: &'a LayerGraph<Validated>,
    dispatcher: &'a mut Box<dyn Dispatcher>,
    pool: &'a BufferPool,
    tasks: &'a TaskPool,
    loaded_bank: &'a mut Option<usize>,
    timings: Arc<StageTimings>,
    failure: FailureSlot,
    layout: ChannelLayout,
    asynchronous: bool,
}

impl BatchRun<'_> {
    fn stage_inputs(&mut self, slots: &mut Vec<Slot>, images: &[&[u8]]) -> Result<(), RuntimeError> {
        for image in images {
            if image.len() > self.graph.footprint.in_mem {
                return Err(RuntimeError::SizeMismatch {
                    what: "input image",
                    expected: self.graph.footprint.in_mem,
                    actual: image.len(),
                });
            }
            let working = self.pool.acquire(BufferKind::Hardware)?;
            self.timings.time(Stage::Input, || {
                working.data().as_mut_slice().fill(0);
                working.write_from_slice(image)
            })?;
            slots.push(Slot {
                working,
                split: None,
                merge: None,
                concat: None,
            });
        }
        Ok(())
    }

    fn walk(&mut self, slots: &mut [Slot]) -> Result<(), RuntimeError> {
        let graph = self.graph;
        let mut cursor = Cursor::Normal;
        let mut pos = 0;
        while let Some(layer) = graph.layer(pos) {
            if layer.kind.contains(LayerKind::SPLIT) {
                cursor = self.split_layer(pos, layer, cursor, slots)?;
            } else if layer.kind.contains(LayerKind::MERGE) {
                match cursor {
                    Cursor::InSplit {
                        split_pos,
                        index,
                        offset,
                    } if index + 1 < layer.merge => {
                        tracing::debug!("merge #{}: replaying split for slice {}", layer.record, index + 1);
                        cursor = Cursor::InSplit {
                            split_pos,
                            index: index + 1,
                            offset: offset + layer.weight_index,
                        };
                        pos = split_pos;
                        continue;
                    }
                    _ => {
                        for slot in slots.iter_mut() {
                            slot.working.wait_settled();
                            slot.split = None;
                            slot.merge = None;
                        }
                        cursor = Cursor::Normal;
                    }
                }
            } else if layer.kind.is_compute() {
                self.compute_layer(pos, layer, cursor, slots)?;
            } else {
                tracing::debug!("skipping record {} ({})", layer.record, layer.kind);
            }
            pos += 1;
        }
        Ok(())
    }

    /// Fans every working buffer out into slices on the first pass, then
    /// copies the current slice back into it.
    fn split_layer(
        &mut self,
        pos: usize,
        layer: &LayerDescriptor,
        cursor: Cursor,
        slots: &mut [Slot],
    ) -> Result<Cursor, RuntimeError> {
        let (cursor, index) = match cursor {
            Cursor::Normal => (
                Cursor::InSplit {
                    split_pos: pos,
                    index: 0,
                    offset: 0,
                },
                0,
            ),
            Cursor::InSplit { index, .. } => (cursor, index),
        };
        let first = index == 0;
        let channels = layer.out_ch;
        let dim = layer.in_dim;
        let bytes = self.layout.map_bytes(dim);
        tracing::debug!("split #{}: slice {index} of {}", layer.record, layer.split);

        for slot in slots.iter_mut() {
            slot.working.wait_settled();
            let reuse = if first { None } else { slot.split.clone() };
            let slices = match reuse {
                Some(slices) => slices,
                None => {
                    let slices = (0..layer.split)
                        .map(|_| self.pool.acquire(BufferKind::Local))
                        .collect::<Result<Vec<_>, _>>()?;
                    let slices = Arc::new(slices);
                    slot.split = Some(Arc::clone(&slices));
                    slices
                }
            };

            let working = slot.working.shared();
            working.set_pending(1);
            let timings = Arc::clone(&self.timings);
            let failure = self.failure.clone();
            let layout = self.layout;
            self.tasks.submit(
                move || {
                    let result = (|| -> Result<(), RuntimeError> {
                        if first {
                            timings.time(Stage::Split, || -> Result<(), RuntimeError> {
                                for (s, slice) in slices.iter().enumerate() {
                                    let (src, mut dst) = lock_pair(&working, slice);
                                    split_channel_slice(
                                        dst.as_mut_slice(),
                                        src.as_slice(),
                                        &layout,
                                        ChannelSlice::new(channels, dim, s),
                                    )?;
                                }
                                Ok(())
                            })?;
                        }
                        let current = slices.get(index).ok_or_else(|| {
                            RuntimeError::JobFailed(format!("no split slice {index}"))
                        })?;
                        timings.time(Stage::SplitCopy, || working.copy_from(current, bytes))?;
                        Ok(())
                    })();
                    failure.record(result);
                    working.arrive();
                },
                self.asynchronous,
            );
        }
        Ok(cursor)
    }

    fn compute_layer(
        &mut self,
        pos: usize,
        layer: &LayerDescriptor,
        cursor: Cursor,
        slots: &mut [Slot],
    ) -> Result<(), RuntimeError> {
        let graph = self.graph;
        let merge = graph
            .layer(pos + 1)
            .filter(|next| next.kind.contains(LayerKind::MERGE))
            .map(|next| next.merge);
        let (split_index, split_offset) = match cursor {
            Cursor::InSplit { index, offset, .. } => (index, offset),
            Cursor::Normal => (0, 0),
        };
        let out_bytes = self.layout.map_bytes(layer.out_dim);
        tracing::debug!("layer {}", layer.summary());

        for it in 0..layer.iterations {
            self.load_weights(layer, split_offset + it)?;
            for slot in slots.iter_mut() {
                let output = self.offload(slot, layer)?;
                if layer.iterations > 1 {
                    self.route_concat(slot, layer, it, output, out_bytes)?;
                } else if let Some(factor) = merge {
                    self.route_merge(slot, layer, factor, split_index, output, out_bytes)?;
                } else {
                    self.timings
                        .time(Stage::Swap, || slot.working.swap_storage(&output))?;
                }
            }
        }
        Ok(())
    }

    /// Loads bank `weight_index + offset` unless it is already resident.
    fn load_weights(&mut self, layer: &LayerDescriptor, offset: usize) -> Result<(), RuntimeError> {
        if self.dispatcher.weight_banks() == 0 {
            return Ok(());
        }
        let bank = layer.weight_index + offset;
        if *self.loaded_bank == Some(bank) {
            return Ok(());
        }
        let timings = Arc::clone(&self.timings);
        timings.time(Stage::Weights, || -> Result<(), RuntimeError> {
            self.dispatcher.dispatch_weights(layer, offset)?;
            self.dispatcher.sync()?;
            Ok(())
        })?;
        *self.loaded_bank = Some(bank);
        tracing::trace!("weight bank {bank} resident");
        Ok(())
    }

    /// Runs `layer` on the slot's working buffer into a fresh output
    /// buffer, executing queued jobs while the accelerator is busy.
    fn offload(&mut self, slot: &Slot, layer: &LayerDescriptor) -> Result<PooledBuffer, RuntimeError> {
        slot.working.wait_settled();
        let timings = Arc::clone(&self.timings);
        let output = timings.time(Stage::Prepare, || -> Result<PooledBuffer, RuntimeError> {
            let output = self.pool.acquire(BufferKind::Hardware)?;
            self.dispatcher
                .dispatch(slot.working.shared(), output.shared(), layer)?;
            Ok(output)
        })?;
        timings.time(Stage::Offload, || -> Result<(), RuntimeError> {
            self.dispatcher.dispatch_async()?;
            while self.dispatcher.running()? {
                if !self.tasks.try_execute_one() {
                    std::hint::spin_loop();
                }
            }
            self.dispatcher.sync()?;
            Ok(())
        })?;
        Ok(output)
    }

    /// Queues iteration `it`'s output for concatenation; the job that
    /// lands last moves the accumulator into the working buffer.
    fn route_concat(
        &mut self,
        slot: &mut Slot,
        layer: &LayerDescriptor,
        it: usize,
        output: PooledBuffer,
        out_bytes: usize,
    ) -> Result<(), RuntimeError> {
        let reuse = if it > 0 { slot.concat.clone() } else { None };
        let acc = match reuse {
            Some(acc) => acc,
            None => {
                let acc = self.pool.acquire(BufferKind::Local)?;
                acc.data().as_mut_slice().fill(0);
                acc.set_pending(layer.iterations);
                let acc = Arc::new(acc);
                slot.concat = Some(Arc::clone(&acc));
                acc
            }
        };
        if it + 1 == layer.iterations {
            slot.working.set_pending(1);
            slot.concat = None;
        }

        let working = slot.working.shared();
        let slice = ChannelSlice::new(layer.out_ch, layer.out_dim, it);
        let timings = Arc::clone(&self.timings);
        let failure = self.failure.clone();
        let layout = self.layout;
        self.tasks.submit(
            move || {
                let concat = timings.time(Stage::Concat, || {
                    let (mut dst, src) = lock_pair(&acc, &output);
                    concat_iteration_slice(dst.as_mut_slice(), src.as_slice(), &layout, slice)
                });
                failure.record(concat.map_err(RuntimeError::from));
                drop(output);
                if acc.arrive() {
                    let copied = timings.time(Stage::SwapCopy, || working.copy_from(&acc, out_bytes));
                    failure.record(copied.map_err(RuntimeError::from));
                    working.arrive();
                }
            },
            self.asynchronous,
        );
        Ok(())
    }

    /// Queues split slice `index`'s output for merging; the job that lands
    /// last moves the merged map into the working buffer.
    fn route_merge(
        &mut self,
        slot: &mut Slot,
        layer: &LayerDescriptor,
        factor: usize,
        index: usize,
        output: PooledBuffer,
        out_bytes: usize,
    ) -> Result<(), RuntimeError> {
        let reuse = if index > 0 { slot.merge.clone() } else { None };
        let acc = match reuse {
            Some(acc) => acc,
            None => {
                let acc = self.pool.acquire(BufferKind::Local)?;
                acc.data().as_mut_slice().fill(0);
                acc.set_pending(factor);
                let acc = Arc::new(acc);
                slot.merge = Some(Arc::clone(&acc));
                acc
            }
        };
        if index + 1 == factor {
            slot.working.set_pending(1);
        }

        let working = slot.working.shared();
        let slice = ChannelSlice::new(layer.out_ch, layer.out_dim, index);
        let timings = Arc::clone(&self.timings);
        let failure = self.failure.clone();
        let layout = self.layout;
        self.tasks.submit(
            move || {
                let merged = timings.time(Stage::Merge, || {
                    let (mut dst, src) = lock_pair(&acc, &output);
                    merge_channel_slice(dst.as_mut_slice(), src.as_slice(), &layout, slice)
                });
                failure.record(merged.map_err(RuntimeError::from));
                drop(output);
                if acc.arrive() {
                    let copied = timings.time(Stage::SwapCopy, || working.copy_from(&acc, out_bytes));
                    failure.record(copied.map_err(RuntimeError::from));
                    working.arrive();
                }
            },
            self.asynchronous,
        );
        Ok(())
    }

    /// Waits for every working buffer and copies `out_mem` bytes out.
    fn collect(&self, slots: &[Slot], out_mem: usize) -> Result<Vec<Vec<u8>>, RuntimeError> {
        slots
            .iter()
            .map(|slot| {
                slot.working.wait_settled();
                self.timings.time(Stage::Result, || {
                    let data = slot.working.data();
                    let output = data.as_slice().get(..out_mem).map(<[u8]>::to_vec);
                    output.ok_or(RuntimeError::SizeMismatch {
                        what: "network output",
                        expected: out_mem,
                        actual: data.len(),
                    })
                })
            })
            .collect()
    }
}
