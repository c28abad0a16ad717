// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! N-of-n rendezvous: an ordering signal, not a lock.
//!
//! A [`Rendezvous`] is armed with a target count of outstanding producers
//! (or consumers). Each one calls [`arrive`](Rendezvous::arrive) when it is
//! done; the call that brings the count to zero returns `true` and wakes
//! every thread blocked in [`wait_settled`](Rendezvous::wait_settled).
//!
//! ```text
//! set_target(3)   arrive() → false   arrive() → false   arrive() → true
//!      │                                                     │
//!      └──────────── wait_settled() blocks ──────────────────┴─► returns
//! ```
//!
//! It does **not** provide mutual exclusion over the buffer bytes. It only
//! tells a consumer that every writer registered since the last
//! `set_target` has finished. Two stages writing the same bytes without an
//! intervening rendezvous is a caller bug.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Reusable completion latch with a re-armable target count.
#[derive(Debug, Default)]
pub struct Rendezvous {
    remaining: Mutex<usize>,
    settled: Condvar,
}

impl Rendezvous {
    /// Creates a settled rendezvous (count zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the rendezvous with `count` outstanding arrivals.
    pub fn set_target(&self, count: usize) {
        *self.lock() = count;
        if count == 0 {
            self.settled.notify_all();
        }
    }

    /// Records one arrival. Returns `true` exactly when the count is zero
    /// afterwards; arriving at an already settled rendezvous is a no-op that
    /// also returns `true`.
    pub fn arrive(&self) -> bool {
        let mut remaining = self.lock();
        if *remaining > 0 {
            *remaining -= 1;
        }
        let done = *remaining == 0;
        drop(remaining);
        if done {
            self.settled.notify_all();
        }
        done
    }

    /// Blocks until the count reaches zero.
    pub fn wait_settled(&self) {
        let mut remaining = self.lock();
        while *remaining > 0 {
            remaining = self
                .settled
                .wait(remaining)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// `true` while arrivals are outstanding.
    pub fn is_pending(&self) -> bool {
        *self.lock() > 0
    }

    /// Number of outstanding arrivals.
    pub fn remaining(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
