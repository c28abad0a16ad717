// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bit-exact buffer operations.
//!
//! Every operation writes into a caller-provided buffer and never
//! allocates. Operations only touch the bit ranges they are asked to, so
//! they are safe to run concurrently on disjoint buffers.

mod bitcopy_op;
mod concat_op;
mod merge_op;
mod pad_op;
mod split_op;

pub use bitcopy_op::{bit_copy, clear_bits};
pub use concat_op::concat_iteration_slice;
pub use merge_op::merge_channel_slice;
pub use pad_op::pad_or_truncate;
pub use split_op::split_channel_slice;
