// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-size worker pool for host-side repacking jobs.
//!
//! ```text
//!   submit(job, true) ──► ┌─────────────┐ ──► worker 0
//!                         │ FIFO queue  │ ──► worker 1
//!   try_execute_one() ◄── └─────────────┘ ──► …
//! ```
//!
//! With zero workers every job runs inline on the submitting thread.
//! The coordinating thread can also pull jobs itself through
//! [`TaskPool::try_execute_one`] while it polls the accelerator.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    /// Jobs popped but not yet finished.
    active: usize,
    stop: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when a job is queued or stop is requested.
    available: Condvar,
    /// Signalled when the queue drains and nothing is running.
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("task pool job panicked");
        }
        let mut state = self.lock();
        state.active -= 1;
        if state.jobs.is_empty() && state.active == 0 {
            self.idle.notify_all();
        }
    }
}

/// Worker-thread pool consuming a FIFO job queue.
pub struct TaskPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Starts `threads` workers; 0 makes every submission synchronous.
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(Shared::default());
        let workers = (0..threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("qnn-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!("cannot spawn worker thread: {e}");
                    None
                }
            })
            .collect::<Vec<_>>();
        if workers.len() < threads {
            tracing::warn!("task pool running with {} of {threads} workers", workers.len());
        }
        tracing::debug!("task pool started with {} workers", workers.len());
        Self { shared, workers }
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job` when `asynchronous` and workers exist, otherwise runs
    /// it on the calling thread before returning.
    pub fn submit<F>(&self, job: F, asynchronous: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        if !asynchronous || self.workers.is_empty() {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("inline job panicked");
            }
            return;
        }
        self.shared.lock().jobs.push_back(Box::new(job));
        self.shared.available.notify_one();
    }

    /// Runs one queued job on the calling thread if there is one.
    pub fn try_execute_one(&self) -> bool {
        let job = {
            let mut state = self.shared.lock();
            let job = state.jobs.pop_front();
            if job.is_some() {
                state.active += 1;
            }
            job
        };
        match job {
            Some(job) => {
                self.shared.run(job);
                true
            }
            None => false,
        }
    }

    /// Blocks until the queue is empty and no job is running.
    pub fn drain_and_wait(&self) {
        let mut state = self.shared.lock();
        while !state.jobs.is_empty() || state.active > 0 {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.lock();
            while state.jobs.is_empty() && !state.stop {
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            match state.jobs.pop_front() {
                Some(job) => {
                    state.active += 1;
                    job
                }
                None => return,
            }
        };
        shared.run(job);
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shared.lock().stop = true;
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("worker thread exited with a panic");
            }
        }
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("threads", &self.workers.len())
            .field("queued", &self.queued())
            .finish()
    }
}
