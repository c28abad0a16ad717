// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Concrete [`Dispatcher`](crate::Dispatcher) implementations.

mod hardware;
mod software;

pub use hardware::HardwareBackend;
pub use software::SoftwareBackend;
