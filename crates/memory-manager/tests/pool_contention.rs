// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Contention behaviour of the buffer pool under concurrent acquirers.

use memory_manager::{BufferKind, BufferPool, HostAllocator, PoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

/// K acquirers against K-1 reserved buffers: K-1 proceed at once, the last
/// one blocks until a buffer is released and then proceeds.
#[test]
fn test_last_acquirer_blocks_until_release() {
    const K: usize = 4;
    let config = PoolConfig::new(256).with_max_buffers(K - 1);
    let pool = BufferPool::new(config, Arc::new(HostAllocator));
    assert_eq!(pool.reserve(K - 1, BufferKind::Hardware), K - 1);

    let acquired = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(K));
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(std::sync::Mutex::new(release_rx));

    let handles: Vec<_> = (0..K)
        .map(|_| {
            let pool = pool.clone();
            let acquired = Arc::clone(&acquired);
            let start = Arc::clone(&start);
            let release_rx = Arc::clone(&release_rx);
            thread::spawn(move || {
                start.wait();
                let buf = pool.acquire(BufferKind::Hardware).unwrap();
                acquired.fetch_add(1, Ordering::SeqCst);
                // Hold the buffer until the test signals one release.
                let _ = release_rx.lock().unwrap().recv();
                drop(buf);
            })
        })
        .collect();

    // Give every thread time to reach the pool.
    let mut waited = Duration::ZERO;
    while acquired.load(Ordering::SeqCst) < K - 1 && waited < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(acquired.load(Ordering::SeqCst), K - 1);
    assert_eq!(pool.total_count(BufferKind::Hardware), K - 1);

    // One release lets the blocked acquirer through.
    release_tx.send(()).unwrap();
    let mut waited = Duration::ZERO;
    while acquired.load(Ordering::SeqCst) < K && waited < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    assert_eq!(acquired.load(Ordering::SeqCst), K);

    for _ in 1..K {
        release_tx.send(()).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.free_count(BufferKind::Hardware), K - 1);
    assert_eq!(pool.stats().timeouts, 0);
}

#[test]
fn test_many_threads_share_small_pool() {
    let config = PoolConfig::new(64).with_max_buffers(2);
    let pool = BufferPool::new(config, Arc::new(HostAllocator));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    let buf = pool.acquire(BufferKind::Local).unwrap();
                    buf.write_from_slice(&[i as u8; 64]).unwrap();
                    assert_eq!(buf.data().as_slice()[63], i as u8);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.acquisitions, 160);
    assert_eq!(stats.in_use, 0);
    assert!(stats.peak_in_use <= 2);
    assert_eq!(pool.total_count(BufferKind::Local), 2);
}
