//! Mock UART Driver for Testing
//!
//! This module provides an in-memory UART driver that can be used to run
//! the line pipeline without real hardware. Bytes fed through a
//! [`MockUartHandle`] go through the same [`RxFifo`] the host driver uses,
//! so pattern detection, position queue overflow and receive buffer
//! overflow behave like the real thing.
//!
//! # Features
//!
//! - **Byte injection**: Feed arbitrary byte streams from any thread
//! - **Event injection**: Raise break, framing, parity and wake-up events
//! - **Fault injection**: Fail the next install or reads, or drop the port
//! - **Inspection**: See the claimed configuration and buffered byte count
//!
//! # Example
//!
//! ```ignore
//! use uartlog_rs::backend::{MockUart, UartEvent};
//!
//! let driver = MockUart::new();
//! let handle = driver.handle();
//!
//! pipeline_with(driver).start(config)?;
//!
//! handle.feed(b"hello\n");
//! handle.inject(UartEvent::ParityError);
//! handle.disconnect(); // pipeline faults
//! ```

use crate::types::PortConfig;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::driver::{DriverOptions, HardwareError, MissedEvents, UartDriver, UartEvent};
use super::rx_fifo::{PushOutcome, RxFifo};

#[derive(Debug, Default)]
struct MockState {
    fifo: Option<RxFifo>,
    events: Option<Sender<UartEvent>>,
    config: Option<PortConfig>,
    install_error: Option<HardwareError>,
    failing_reads: usize,
    install_count: usize,
    missed: MissedEvents,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockState>,
    data_ready: Condvar,
}

/// In-memory UART driver
#[derive(Debug, Default)]
pub struct MockUart {
    shared: Arc<Shared>,
}

/// Test-side control handle of a [`MockUart`]
#[derive(Debug, Clone)]
pub struct MockUartHandle {
    shared: Arc<Shared>,
}

impl MockUart {
    /// Create a new mock driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a control handle that stays valid after the driver is moved
    pub fn handle(&self) -> MockUartHandle {
        MockUartHandle {
            shared: self.shared.clone(),
        }
    }
}

impl UartDriver for MockUart {
    fn install(
        &mut self,
        config: &PortConfig,
        options: DriverOptions,
    ) -> Result<Receiver<UartEvent>, HardwareError> {
        let mut state = self.shared.state.lock();
        if let Some(err) = state.install_error.take() {
            return Err(err);
        }

        let (tx, rx) = bounded(options.event_queue_len);
        state.fifo = Some(RxFifo::new(options.rx_buffer_size));
        state.events = Some(tx);
        state.config = Some(*config);
        state.missed = MissedEvents::default();
        state.install_count += 1;
        Ok(rx)
    }

    fn uninstall(&mut self) {
        let mut state = self.shared.state.lock();
        state.fifo = None;
        state.events = None;
        state.config = None;
    }

    fn is_installed(&self) -> bool {
        self.shared.state.lock().fifo.is_some()
    }

    fn enable_pattern_detect(&mut self, pattern: u8, queue_len: usize) -> Result<(), HardwareError> {
        let mut state = self.shared.state.lock();
        let fifo = state.fifo.as_mut().ok_or(HardwareError::NotInstalled)?;
        fifo.set_pattern(pattern, queue_len);
        Ok(())
    }

    fn pop_pattern_position(&mut self) -> Option<usize> {
        self.shared
            .state
            .lock()
            .fifo
            .as_mut()
            .and_then(RxFifo::pop_pattern_position)
    }

    fn buffered_len(&self) -> usize {
        self.shared.state.lock().fifo.as_ref().map_or(0, RxFifo::len)
    }

    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, HardwareError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.state.lock();

        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(HardwareError::Io("injected read failure".into()));
        }

        loop {
            let fifo = state.fifo.as_mut().ok_or(HardwareError::NotInstalled)?;
            if !fifo.is_empty() || buf.is_empty() {
                return Ok(fifo.read(buf));
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.data_ready.wait_until(&mut state, deadline).timed_out() {
                        return Ok(0);
                    }
                }
                None => self.shared.data_ready.wait(&mut state),
            }
        }
    }

    fn flush_input(&mut self) {
        if let Some(fifo) = self.shared.state.lock().fifo.as_mut() {
            fifo.flush();
        }
    }

    fn take_missed_events(&mut self) -> MissedEvents {
        std::mem::take(&mut self.shared.state.lock().missed)
    }
}

impl MockUartHandle {
    /// Push bytes into the receive FIFO and raise the matching events
    ///
    /// Blocks while the event queue is full. Bytes fed while the driver is
    /// not installed are discarded.
    pub fn feed(&self, bytes: &[u8]) -> PushOutcome {
        let (outcome, sender) = {
            let mut state = self.shared.state.lock();
            let Some(fifo) = state.fifo.as_mut() else {
                return PushOutcome::default();
            };
            let outcome = fifo.push(bytes);
            (outcome, state.events.clone())
        };
        self.shared.data_ready.notify_all();

        if let Some(sender) = sender {
            if outcome.overflowed {
                let _ = sender.send(UartEvent::BufferFull);
            }
            for _ in 0..outcome.patterns {
                let _ = sender.send(UartEvent::PatternDetected);
            }
        }
        outcome
    }

    /// Push bytes as if the event queue were full: no events are raised and
    /// the driver reports them as missed instead
    pub fn feed_dropping_events(&self, bytes: &[u8]) -> PushOutcome {
        let mut state = self.shared.state.lock();
        let Some(fifo) = state.fifo.as_mut() else {
            return PushOutcome::default();
        };
        let outcome = fifo.push(bytes);
        state.missed.patterns += outcome.patterns;
        state.missed.overflows += usize::from(outcome.overflowed);
        drop(state);
        self.shared.data_ready.notify_all();
        outcome
    }

    /// Feed each string followed by a newline
    pub fn feed_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            let mut bytes = Vec::with_capacity(line.len() + 1);
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
            self.feed(&bytes);
        }
    }

    /// Raise a driver event. Returns false if the driver is not installed.
    pub fn inject(&self, event: UartEvent) -> bool {
        let sender = self.shared.state.lock().events.clone();
        match sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate losing the port: the event queue disconnects
    pub fn disconnect(&self) {
        self.shared.state.lock().events = None;
    }

    /// Make the next install fail with `err`
    pub fn fail_next_install(&self, err: HardwareError) {
        self.shared.state.lock().install_error = Some(err);
    }

    /// Make the next `count` reads fail
    pub fn fail_next_reads(&self, count: usize) {
        self.shared.state.lock().failing_reads = count;
    }

    /// Configuration the port was last claimed with, while installed
    pub fn installed_config(&self) -> Option<PortConfig> {
        self.shared.state.lock().config
    }

    /// Check if the driver is installed
    pub fn is_installed(&self) -> bool {
        self.shared.state.lock().fifo.is_some()
    }

    /// Number of successful installs so far
    pub fn install_count(&self) -> usize {
        self.shared.state.lock().install_count
    }

    /// Bytes waiting in the receive FIFO
    pub fn buffered_len(&self) -> usize {
        self.shared.state.lock().fifo.as_ref().map_or(0, RxFifo::len)
    }
}
