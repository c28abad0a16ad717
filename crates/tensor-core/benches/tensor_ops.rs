// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for packed-buffer operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tensor_core::{
    bit_copy, concat_iteration_slice, merge_channel_slice, split_channel_slice, ChannelLayout,
    ChannelSlice,
};

fn bench_bit_copy(c: &mut Criterion) {
    let src = vec![0x5Au8; 4096];
    let mut dst = vec![0u8; 4096];

    c.bench_function("bit_copy aligned 32 kbit", |b| {
        b.iter(|| bit_copy(black_box(&mut dst), 0, black_box(&src), 0, 32 * 1024 - 64))
    });
    c.bench_function("bit_copy unaligned 32 kbit", |b| {
        b.iter(|| bit_copy(black_box(&mut dst), 17, black_box(&src), 33, 32 * 1024 - 64))
    });
}

fn bench_channel_ops(c: &mut Criterion) {
    // Reference accelerator: 2-bit activations, 384 channels, 32×32 map.
    let layout = ChannelLayout::for_capacity(2, 384, 8);
    let map = vec![0xA5u8; layout.map_bytes(32)];
    let mut out = vec![0u8; layout.map_bytes(32)];

    c.bench_function("split 2-way 32x32", |b| {
        b.iter(|| split_channel_slice(&mut out, &map, &layout, ChannelSlice::new(192, 32, 1)))
    });
    c.bench_function("merge 2-way 32x32", |b| {
        b.iter(|| merge_channel_slice(&mut out, &map, &layout, ChannelSlice::new(192, 32, 1)))
    });
    c.bench_function("concat 3 iterations 32x32", |b| {
        b.iter(|| concat_iteration_slice(&mut out, &map, &layout, ChannelSlice::new(100, 32, 2)))
    });
}

criterion_group!(benches, bench_bit_copy, bench_channel_ops);
criterion_main!(benches);
