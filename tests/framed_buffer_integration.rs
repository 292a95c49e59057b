//! Integration tests for the framed line buffer under concurrency
//!
//! These tests validate the buffer contract with a real producer thread:
//! - Commit order is delivery order
//! - Outstanding bytes never exceed capacity
//! - Consumers on several threads share one buffer safely

mod common;

use common::long_timeout;
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uartlog_rs::pipeline::{AcquireError, FramedBuffer, WAIT_FOREVER};

fn record(i: usize) -> Vec<u8> {
    // Variable lengths exercise wrap-around
    let len = 1 + (i * 7) % 50;
    let mut bytes = format!("{:06}:", i).into_bytes();
    bytes.resize(len.max(bytes.len()), b'a' + (i % 26) as u8);
    bytes
}

#[test]
#[serial]
fn test_producer_consumer_order_and_content() {
    let buffer = FramedBuffer::with_capacity(512).unwrap();
    let count = 5_000;

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            for i in 0..count {
                let bytes = record(i);
                let mut chunk = buffer.acquire(bytes.len(), long_timeout()).unwrap();
                chunk.as_mut_slice().copy_from_slice(&bytes);
                chunk.commit();
            }
        })
    };

    for i in 0..count {
        let chunk = buffer.receive(long_timeout()).unwrap();
        assert_eq!(chunk.as_bytes(), record(i).as_slice(), "record {}", i);
        assert!(buffer.used() <= buffer.capacity());
        buffer.release(chunk);
    }
    producer.join().unwrap();
    assert_eq!(buffer.used(), 0);
}

#[test]
#[serial]
fn test_capacity_never_exceeded_with_slow_consumers() {
    let buffer = FramedBuffer::with_capacity(128).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let watcher = {
        let buffer = buffer.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut max_used = 0;
            while !done.load(Ordering::SeqCst) {
                max_used = max_used.max(buffer.used());
            }
            max_used
        })
    };

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut received = 0;
                while let Ok(chunk) = buffer.receive(Duration::from_millis(300)) {
                    thread::sleep(Duration::from_micros(200));
                    drop(chunk);
                    received += 1;
                }
                received
            })
        })
        .collect();

    for i in 0..1_000 {
        let bytes = record(i);
        let mut chunk = buffer.acquire(bytes.len(), long_timeout()).unwrap();
        chunk.as_mut_slice().copy_from_slice(&bytes);
        chunk.commit();
    }

    let received: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
    done.store(true, Ordering::SeqCst);
    let max_used = watcher.join().unwrap();

    assert_eq!(received, 1_000);
    assert!(max_used <= 128, "used peaked at {}", max_used);
}

#[test]
fn test_blocked_acquire_times_out_then_succeeds_after_release() {
    let buffer = FramedBuffer::with_capacity(16).unwrap();
    let mut chunk = buffer.try_acquire(12).unwrap();
    chunk.as_mut_slice().copy_from_slice(b"twelve bytes");
    chunk.commit();

    assert_eq!(
        buffer.acquire(8, Duration::from_millis(20)).unwrap_err(),
        AcquireError::Timeout
    );

    let held = buffer.receive(WAIT_FOREVER).unwrap();
    let waiter = {
        let buffer = buffer.clone();
        thread::spawn(move || buffer.acquire(8, long_timeout()).is_ok())
    };
    thread::sleep(Duration::from_millis(20));
    buffer.release(held);
    assert!(waiter.join().unwrap());
}

#[test]
fn test_lines_outlive_other_handles() {
    let buffer = FramedBuffer::with_capacity(32).unwrap();
    let mut chunk = buffer.try_acquire(5).unwrap();
    chunk.as_mut_slice().copy_from_slice(b"kept!");
    chunk.commit();

    let line = buffer.try_receive().unwrap();
    drop(buffer);
    assert_eq!(line.as_bytes(), b"kept!");
}
