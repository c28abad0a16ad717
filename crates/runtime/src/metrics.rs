// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-stage timing counters.
//!
//! [`StageTimings`] is shared between the coordinating thread and task-pool
//! jobs, so every counter is an atomic. [`TimingReport`] is a plain
//! snapshot for printing or serialising.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pipeline stages that are timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Fanning a map out into split slices.
    Split,
    /// Copying the current split slice into the working buffer.
    SplitCopy,
    /// Writing a slice into the merge accumulator.
    Merge,
    /// Loading a weight bank into the accelerator.
    Weights,
    /// Acquiring the output buffer and programming the layer.
    Prepare,
    /// Accelerator run, from start to sync.
    Offload,
    /// Writing an iteration's channels into the accumulator.
    Concat,
    /// Copying an accumulator back into the working buffer.
    SwapCopy,
    /// Swapping an output buffer into the working buffer.
    Swap,
    /// Copying results out of the working buffers.
    Result,
    /// Staging input images into working buffers.
    Input,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::Split,
        Stage::SplitCopy,
        Stage::Merge,
        Stage::Weights,
        Stage::Prepare,
        Stage::Offload,
        Stage::Concat,
        Stage::SwapCopy,
        Stage::Swap,
        Stage::Result,
        Stage::Input,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Split => "split",
            Stage::SplitCopy => "split-copy",
            Stage::Merge => "merge",
            Stage::Weights => "weights",
            Stage::Prepare => "prepare",
            Stage::Offload => "offload",
            Stage::Concat => "concat",
            Stage::SwapCopy => "swap-copy",
            Stage::Swap => "swap",
            Stage::Result => "result",
            Stage::Input => "input",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accumulated time and hit count per stage.
#[derive(Debug, Default)]
pub struct StageTimings {
    enabled: AtomicBool,
    nanos: [AtomicU64; 11],
    hits: [AtomicU64; 11],
}

impl StageTimings {
    pub fn new(enabled: bool) -> Self {
        let t = Self::default();
        t.enabled.store(enabled, Ordering::Relaxed);
        t
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn record(&self, stage: Stage, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        let i = stage.index();
        self.nanos[i].fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.hits[i].fetch_add(1, Ordering::Relaxed);
    }

    /// Runs `f` and charges its duration to `stage`.
    pub fn time<T>(&self, stage: Stage, f: impl FnOnce() -> T) -> T {
        if !self.is_enabled() {
            return f();
        }
        let start = Instant::now();
        let out = f();
        self.record(stage, start.elapsed());
        out
    }

    pub fn total(&self, stage: Stage) -> Duration {
        Duration::from_nanos(self.nanos[stage.index()].load(Ordering::Relaxed))
    }

    pub fn hits(&self, stage: Stage) -> u64 {
        self.hits[stage.index()].load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for (n, h) in self.nanos.iter().zip(&self.hits) {
            n.store(0, Ordering::Relaxed);
            h.store(0, Ordering::Relaxed);
        }
    }

    pub fn report(&self) -> TimingReport {
        TimingReport {
            stages: Stage::ALL
                .iter()
                .map(|&s| StageTime {
                    stage: s,
                    total: self.total(s),
                    hits: self.hits(s),
                })
                .collect(),
        }
    }
}

/// One stage's accumulated time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageTime {
    pub stage: Stage,
    pub total: Duration,
    pub hits: u64,
}

/// Snapshot of every stage counter.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimingReport {
    pub stages: Vec<StageTime>,
}

impl TimingReport {
    /// Sum over all stages. Stages run by workers overlap the
    /// coordinator's, so this can exceed wall-clock time.
    pub fn total(&self) -> Duration {
        self.stages.iter().map(|s| s.total).sum()
    }

    /// Returns a human-readable breakdown suitable for CLI output.
    pub fn summary(&self) -> String {
        let mut out = String::from("Stage timings:\n");
        for s in self.stages.iter().filter(|s| s.hits > 0) {
            let ms = s.total.as_secs_f64() * 1000.0;
            out.push_str(&format!(
                "  {:<11} {:>10.3} ms  ({} × {:.3} ms)\n",
                s.stage.name(),
                ms,
                s.hits,
                ms / s.hits as f64
            ));
        }
        out.push_str(&format!(
            "  {:<11} {:>10.3} ms",
            "total",
            self.total().as_secs_f64() * 1000.0
        ));
        out
    }
}
