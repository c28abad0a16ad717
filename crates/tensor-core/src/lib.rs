// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Bit-exact operations on packed, quantized feature maps as the accelerator
//! reads and writes them.
//!
//! This crate provides:
//! - [`ChannelLayout`]: per-pixel packing (activation width, pixel stride).
//! - [`bit_copy`]: arbitrary-offset bit copy at 64-bit word granularity.
//! - [`pad_or_truncate`]: element-wise repacking between buffer sizes.
//! - [`split_channel_slice`], [`merge_channel_slice`],
//!   [`concat_iteration_slice`]: channel-group reshaping that glues split,
//!   merged and multi-pass layers together.
//! - [`verify`]: per-pixel comparison against a golden map.
//!
//! # Design Goals
//! - No allocation: every operation writes into a caller-owned buffer.
//! - Bits outside the requested ranges are never touched.
//! - Clean error types via `thiserror`.

mod error;
mod layout;
mod ops;
mod verify;

pub use error::TensorError;
pub use layout::{pad_to, ChannelLayout, ChannelSlice};
pub use ops::{
    bit_copy, clear_bits, concat_iteration_slice, merge_channel_slice, pad_or_truncate,
    split_channel_slice,
};
pub use verify::{verify, VerifyReport};
