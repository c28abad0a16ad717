// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Installed weight memory.

use memory_manager::DeviceMemory;
use std::collections::BTreeMap;

/// Weight and threshold memory for every bank, one block per memory
/// channel.
#[derive(Debug, Default)]
pub struct WeightBanks {
    banks: BTreeMap<usize, Vec<Box<dyn DeviceMemory>>>,
}

impl WeightBanks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `channels` as bank `bank`, replacing any previous contents.
    pub fn insert(&mut self, bank: usize, channels: Vec<Box<dyn DeviceMemory>>) {
        if self.banks.insert(bank, channels).is_some() {
            tracing::debug!("replaced weight bank {bank}");
        }
    }

    /// Per-channel blocks of `bank`.
    pub fn get(&self, bank: usize) -> Option<&[Box<dyn DeviceMemory>]> {
        self.banks.get(&bank).map(Vec::as_slice)
    }

    /// Block of `bank` in memory channel `channel`.
    pub fn channel(&self, bank: usize, channel: usize) -> Option<&dyn DeviceMemory> {
        self.get(bank)?.get(channel).map(|b| b.as_ref())
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }

    /// Frees every installed bank.
    pub fn clear(&mut self) {
        self.banks.clear();
    }
}
