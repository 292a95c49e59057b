//! Integration tests for the line pipeline lifecycle
//!
//! These tests validate the complete per-port workflow:
//! - Degraded start on a bad configuration
//! - Framing, ordering and timestamp prefixes
//! - Recovery counters under overload
//! - Port loss, fault reporting and explicit restart

mod common;

use common::builders::{DocumentBuilder, UartEntryBuilder};
use common::mock_helpers::{mock_pipeline, small_settings};
use common::{long_timeout, test_timeout, wait_until};
use serial_test::serial;
use std::time::Duration;
use uartlog_rs::backend::UartEvent;
use uartlog_rs::config::{resolve_value, PipelineSettings};
use uartlog_rs::error::{ConfigError, PipelineError, RecvError};
use uartlog_rs::pipeline::{LineReceiver, WAIT_FOREVER};
use uartlog_rs::types::{PortConfig, PortState};

fn valid_config() -> PortConfig {
    let doc = DocumentBuilder::new()
        .entry(UartEntryBuilder::new())
        .build();
    resolve_value(&doc, 0).unwrap()
}

#[test]
fn test_invalid_stop_bits_never_starts() {
    let doc = DocumentBuilder::new()
        .entry(UartEntryBuilder::new().stop_bits(1.2))
        .build();
    let (mut pipeline, feeder) = mock_pipeline(1, small_settings());

    let err = pipeline.start(resolve_value(&doc, 0)).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Config(ConfigError::InvalidStopBits(v)) if v == 1.2
    ));
    assert_eq!(pipeline.state(), PortState::Disabled);
    assert!(!feeder.is_installed());
    assert_eq!(feeder.install_count(), 0);
}

#[test]
fn test_lines_arrive_in_order_without_terminators() {
    let (mut pipeline, feeder) = mock_pipeline(1, small_settings());
    pipeline.set_timestamp_prefix(false);
    pipeline.start(Ok(valid_config())).unwrap();
    assert_eq!(pipeline.state(), PortState::Running);
    assert_eq!(feeder.installed_config(), Some(valid_config()));

    // Split across feeds, including a terminator arriving on its own
    feeder.feed(b"first li");
    feeder.feed(b"ne\nsecond\nthi");
    feeder.feed(b"rd");
    feeder.feed(b"\n");

    for expected in [&b"first line"[..], b"second", b"third"] {
        let line = pipeline.receive_line(long_timeout()).unwrap();
        assert_eq!(line.as_bytes(), expected);
        assert_eq!(line.len(), expected.len());
        pipeline.release_line(line);
    }
    assert_eq!(
        pipeline.receive_line(test_timeout()).unwrap_err(),
        RecvError::Timeout
    );
    assert_eq!(pipeline.stats().lines_framed, 3);
}

#[test]
fn test_empty_lines_are_not_emitted() {
    let (mut pipeline, feeder) = mock_pipeline(1, small_settings());
    pipeline.set_timestamp_prefix(false);
    pipeline.start(Ok(valid_config())).unwrap();

    feeder.feed(b"\n\nafter blanks\n");
    let line = pipeline.receive_line(long_timeout()).unwrap();
    assert_eq!(line.as_bytes(), b"after blanks");
    assert_eq!(pipeline.stats().empty_patterns, 2);
}

#[test]
fn test_timestamp_toggle_applies_to_later_lines_only() {
    let (mut pipeline, feeder) = mock_pipeline(1, small_settings());
    pipeline.start(Ok(valid_config())).unwrap();
    let receiver = pipeline.handle();

    feeder.feed(b"stamped\n");
    wait_until("first line framed", || pipeline.stats().lines_framed == 1);
    receiver.set_timestamp_prefix(false);
    feeder.feed(b"plain\n");

    let first = receiver.receive_line(long_timeout()).unwrap();
    assert_eq!(first.payload(), b"stamped");
    assert!(!first.prefix().is_empty());
    assert_eq!(first.len(), first.prefix().len() + b"stamped".len());
    let text = String::from_utf8(first.prefix().to_vec()).unwrap();
    assert!(text.starts_with('[') && text.ends_with("] "), "{:?}", text);
    assert!(text[1..text.len() - 2].chars().all(|c| c.is_ascii_digit()));

    let second = receiver.receive_line(long_timeout()).unwrap();
    assert_eq!(second.as_bytes(), b"plain");
    assert!(second.prefix().is_empty());
}

#[test]
#[serial]
fn test_unreleased_lines_cause_observable_drops() {
    let (mut pipeline, feeder) = mock_pipeline(1, small_settings());
    pipeline.set_timestamp_prefix(false);
    pipeline.start(Ok(valid_config())).unwrap();

    // 256 byte buffer, 100 byte lines: two fit, the third is dropped
    let line = [b'z'; 100];
    let mut held = Vec::new();
    for _ in 0..2 {
        feeder.feed(&line);
        feeder.feed(b"\n");
        held.push(pipeline.receive_line(long_timeout()).unwrap());
    }
    feeder.feed(&line);
    feeder.feed(b"\n");
    wait_until("line dropped", || pipeline.stats().dropped_lines == 1);

    let stats = pipeline.stats();
    assert_eq!(stats.dropped_bytes, 100);
    assert_eq!(stats.lines_framed, 2);

    // Releasing restores capacity
    held.clear();
    feeder.feed(b"recovered\n");
    let line = pipeline.receive_line(long_timeout()).unwrap();
    assert_eq!(line.as_bytes(), b"recovered");
}

#[test]
fn test_overflow_event_flushes_and_continues() {
    let (mut pipeline, feeder) = mock_pipeline(1, small_settings());
    pipeline.set_timestamp_prefix(false);
    pipeline.start(Ok(valid_config())).unwrap();

    feeder.feed(b"garbage without terminator");
    feeder.inject(UartEvent::FifoOverflow);
    wait_until("overflow handled", || pipeline.stats().overflow_flushes == 1);
    assert_eq!(feeder.buffered_len(), 0);

    feeder.feed(b"clean\n");
    assert_eq!(
        pipeline.receive_line(long_timeout()).unwrap().as_bytes(),
        b"clean"
    );
}

#[test]
fn test_port_loss_faults_then_restart() {
    let (mut pipeline, feeder) = mock_pipeline(2, small_settings());
    pipeline.set_timestamp_prefix(false);
    pipeline.start(Ok(valid_config())).unwrap();

    feeder.feed(b"before loss\n");
    wait_until("line framed", || pipeline.stats().lines_framed == 1);
    feeder.disconnect();
    wait_until("fault", || pipeline.is_faulted());
    assert!(pipeline.fault().is_some());

    // Lines framed before the fault can still be drained
    assert_eq!(
        pipeline.receive_line(test_timeout()).unwrap().as_bytes(),
        b"before loss"
    );
    assert!(matches!(
        pipeline.receive_line(test_timeout()),
        Err(RecvError::Faulted(_))
    ));

    pipeline.start(Ok(valid_config())).unwrap();
    assert_eq!(pipeline.state(), PortState::Running);
    assert_eq!(feeder.install_count(), 2);
    feeder.feed(b"after restart\n");
    assert_eq!(
        pipeline.receive_line(long_timeout()).unwrap().as_bytes(),
        b"after restart"
    );
}

/// Block on `receiver` without a deadline in another thread
fn wait_forever(receiver: LineReceiver) -> crossbeam_channel::Receiver<Result<Vec<u8>, RecvError>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let result = receiver
            .receive_line(WAIT_FOREVER)
            .map(|line| line.as_bytes().to_vec());
        let _ = tx.send(result);
    });
    rx
}

#[test]
fn test_port_loss_wakes_waiting_consumer() {
    let (mut pipeline, feeder) = mock_pipeline(1, small_settings());
    pipeline.start(Ok(valid_config())).unwrap();

    let outcome = wait_forever(pipeline.handle());
    std::thread::sleep(Duration::from_millis(50));
    feeder.disconnect();

    let result = outcome.recv_timeout(long_timeout()).unwrap();
    assert_eq!(
        result,
        Err(RecvError::Faulted("UART event queue closed".into()))
    );
    assert!(pipeline.is_faulted());
}

#[test]
fn test_stop_wakes_waiting_consumer() {
    let (mut pipeline, _feeder) = mock_pipeline(1, small_settings());
    pipeline.start(Ok(valid_config())).unwrap();

    let outcome = wait_forever(pipeline.handle());
    std::thread::sleep(Duration::from_millis(50));
    pipeline.stop();

    let result = outcome.recv_timeout(long_timeout()).unwrap();
    assert_eq!(result, Err(RecvError::NotRunning));
}

#[test]
fn test_lines_outlive_stop() {
    let (mut pipeline, feeder) = mock_pipeline(1, small_settings());
    pipeline.set_timestamp_prefix(false);
    pipeline.start(Ok(valid_config())).unwrap();

    feeder.feed(b"held across stop\n");
    let line = pipeline.receive_line(long_timeout()).unwrap();
    pipeline.stop();

    assert_eq!(pipeline.state(), PortState::Uninitialized);
    assert_eq!(line.as_bytes(), b"held across stop");
    assert_eq!(
        pipeline.receive_line(Duration::ZERO).unwrap_err(),
        RecvError::NotRunning
    );
}

#[test]
#[serial]
fn test_concurrent_consumers_share_one_port() {
    let settings = PipelineSettings {
        ring_capacity: 4096,
        pattern_queue_len: 64,
        ..small_settings()
    };
    let (mut pipeline, feeder) = mock_pipeline(1, settings);
    pipeline.set_timestamp_prefix(false);
    pipeline.start(Ok(valid_config())).unwrap();

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let receiver = pipeline.handle();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while let Ok(line) = receiver.receive_line(Duration::from_millis(300)) {
                    seen.push(String::from_utf8(line.as_bytes().to_vec()).unwrap());
                    receiver.release_line(line);
                }
                seen
            })
        })
        .collect();

    for i in 0..200 {
        feeder.feed(format!("line-{:03}\n", i).as_bytes());
    }

    let mut all: Vec<String> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();
    all.sort();
    let expected: Vec<String> = (0..200).map(|i| format!("line-{:03}", i)).collect();
    assert_eq!(all, expected);
    assert_eq!(pipeline.stats().data_loss_events(), 0);
}
