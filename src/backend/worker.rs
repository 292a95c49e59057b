//! Per-port event task
//!
//! This module contains the loop that runs in a dedicated thread for every
//! running port. It is the only producer into the port's [`FramedBuffer`] and
//! the only user of the port's driver while it runs.
//!
//! # Responsibilities
//!
//! - **Event dispatch**: Waits on the driver's event queue and handles every
//!   event kind
//! - **Framing**: Turns each detected terminator into one committed line,
//!   optionally prefixed with a timestamp
//! - **Recovery**: Flushes raw input on overflow, lost pattern positions,
//!   buffer exhaustion and failed reads, and keeps going
//! - **Statistics**: Counts every recovery action in [`PortStatus`]
//!
//! The task exits when the shutdown channel fires or disconnects, or when the
//! driver's event queue disconnects. The latter means the port was lost and
//! leaves the port [`PortState::Faulted`]. Either way the driver is handed
//! back through the thread's join handle so the pipeline can restart.

use crate::config::PipelineSettings;
use crate::pipeline::framed_buffer::FramedBuffer;
use crate::pipeline::timestamp::{self, PrefixBuf, PREFIX_CAPACITY};
use crate::types::{PipelineStats, PortState};
use crossbeam_channel::{select, Receiver};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use super::driver::{UartDriver, UartEvent};

/// Scratch size used when skipping a dropped line
const DISCARD_CHUNK: usize = 256;

/// Lock-free counters behind [`PipelineStats`]
#[derive(Debug, Default)]
pub struct PortCounters {
    lines_framed: AtomicU64,
    bytes_framed: AtomicU64,
    dropped_lines: AtomicU64,
    dropped_bytes: AtomicU64,
    overflow_flushes: AtomicU64,
    pattern_queue_overflows: AtomicU64,
    empty_patterns: AtomicU64,
    read_errors: AtomicU64,
    frame_errors: AtomicU64,
    parity_errors: AtomicU64,
    breaks: AtomicU64,
    wakeups: AtomicU64,
    unknown_events: AtomicU64,
    dropped_events: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PortCounters {
    /// Take a consistent-enough copy of all counters
    pub fn snapshot(&self) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            lines_framed: load(&self.lines_framed),
            bytes_framed: load(&self.bytes_framed),
            dropped_lines: load(&self.dropped_lines),
            dropped_bytes: load(&self.dropped_bytes),
            overflow_flushes: load(&self.overflow_flushes),
            pattern_queue_overflows: load(&self.pattern_queue_overflows),
            empty_patterns: load(&self.empty_patterns),
            read_errors: load(&self.read_errors),
            frame_errors: load(&self.frame_errors),
            parity_errors: load(&self.parity_errors),
            breaks: load(&self.breaks),
            wakeups: load(&self.wakeups),
            unknown_events: load(&self.unknown_events),
            dropped_events: load(&self.dropped_events),
        }
    }
}

/// State shared between a pipeline, its consumers and its event task
#[derive(Debug)]
pub struct PortStatus {
    state: AtomicU8,
    timestamps: AtomicBool,
    fault: Mutex<Option<String>>,
    counters: PortCounters,
}

impl PortStatus {
    pub fn new(timestamps: bool) -> Self {
        Self {
            state: AtomicU8::new(PortState::Uninitialized.as_u8()),
            timestamps: AtomicBool::new(timestamps),
            fault: Mutex::new(None),
            counters: PortCounters::default(),
        }
    }

    pub fn state(&self) -> PortState {
        PortState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: PortState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn timestamps_enabled(&self) -> bool {
        self.timestamps.load(Ordering::SeqCst)
    }

    pub fn set_timestamps(&self, enabled: bool) {
        self.timestamps.store(enabled, Ordering::SeqCst);
    }

    /// Reason for the last fault, if the port is faulted
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Record a fault and move to [`PortState::Faulted`]
    pub fn set_fault(&self, reason: impl Into<String>) {
        *self.fault.lock() = Some(reason.into());
        self.set_state(PortState::Faulted);
    }

    pub fn clear_fault(&self) {
        *self.fault.lock() = None;
    }

    pub fn counters(&self) -> &PortCounters {
        &self.counters
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }
}

/// How the event loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown was requested
    Shutdown,
    /// The driver's event queue disconnected
    PortLost,
}

/// The event loop of one port
pub struct EventWorker {
    port: usize,
    driver: Box<dyn UartDriver>,
    events: Receiver<UartEvent>,
    shutdown: Receiver<()>,
    buffer: FramedBuffer,
    status: Arc<PortStatus>,
    settings: PipelineSettings,
}

impl EventWorker {
    /// Create a worker for an installed, pattern-armed driver
    pub fn new(
        port: usize,
        driver: Box<dyn UartDriver>,
        events: Receiver<UartEvent>,
        shutdown: Receiver<()>,
        buffer: FramedBuffer,
        status: Arc<PortStatus>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            port,
            driver,
            events,
            shutdown,
            buffer,
            status,
            settings,
        }
    }

    /// Run until shutdown or port loss, then hand the driver back
    pub fn run(mut self) -> Box<dyn UartDriver> {
        tracing::info!(port = self.port, "Event task started");

        let exit = self.run_loop();
        match exit {
            WorkerExit::Shutdown => {
                tracing::info!(port = self.port, "Event task stopped");
            }
            WorkerExit::PortLost => {
                tracing::error!(port = self.port, "UART event queue closed, port lost");
                self.status.set_fault("UART event queue closed");
            }
        }
        // Wakes consumers blocked on the buffer; no line follows
        self.buffer.close();
        self.driver
    }

    fn run_loop(&mut self) -> WorkerExit {
        loop {
            select! {
                recv(self.shutdown) -> _ => return WorkerExit::Shutdown,
                recv(self.events) -> event => match event {
                    Ok(event) => {
                        self.handle_event(event);
                        self.replay_missed_events();
                    }
                    Err(_) => return WorkerExit::PortLost,
                },
            }
        }
    }

    /// Dispatch one driver event
    pub fn handle_event(&mut self, event: UartEvent) {
        let port = self.port;
        let counters = &self.status.counters;
        match event {
            UartEvent::Break => {
                bump(&counters.breaks, 1);
                tracing::info!(port, "UART rx break");
            }
            UartEvent::FifoOverflow | UartEvent::BufferFull => {
                bump(&counters.overflow_flushes, 1);
                tracing::warn!(port, ?event, "UART buffer full, flushing input");
                self.driver.flush_input();
            }
            UartEvent::FrameError => {
                bump(&counters.frame_errors, 1);
                tracing::warn!(port, "UART frame error");
            }
            UartEvent::ParityError => {
                bump(&counters.parity_errors, 1);
                tracing::warn!(port, "UART parity error");
            }
            UartEvent::PatternDetected => self.handle_pattern(),
            UartEvent::Wakeup => {
                bump(&counters.wakeups, 1);
                tracing::info!(port, "Waking up from UART");
            }
            UartEvent::Other(code) => {
                bump(&counters.unknown_events, 1);
                tracing::trace!(port, code, "Ignoring UART event");
            }
        }
    }

    /// Handle the events the driver dropped on a full event queue
    ///
    /// Drops only happen while the queue is full, so a queued event always
    /// follows and brings the worker back here.
    fn replay_missed_events(&mut self) {
        let missed = self.driver.take_missed_events();
        if missed.is_empty() {
            return;
        }
        bump(&self.status.counters.dropped_events, missed.total());
        tracing::warn!(
            port = self.port,
            patterns = missed.patterns,
            overflows = missed.overflows,
            "UART event queue was full, replaying dropped events"
        );

        if missed.overflows > 0 {
            // The flush also drops the positions of the missed patterns
            self.handle_event(UartEvent::BufferFull);
            return;
        }
        for _ in 0..missed.patterns {
            self.handle_pattern();
        }
    }

    fn handle_pattern(&mut self) {
        let port = self.port;
        let counters = &self.status.counters;

        let Some(pos) = self.driver.pop_pattern_position() else {
            // The detection was reported but its position did not fit in the queue
            bump(&counters.pattern_queue_overflows, 1);
            tracing::warn!(port, "Pattern position queue overflow, flushing input");
            self.driver.flush_input();
            return;
        };

        if pos == 0 {
            bump(&counters.empty_patterns, 1);
            tracing::error!(port, "Pattern detection error (nothing for Rx?)");
            self.discard_terminator();
            return;
        }

        let mut prefix: PrefixBuf = [0; PREFIX_CAPACITY];
        let prefix_len = if self.status.timestamps_enabled() {
            timestamp::render_prefix(&mut prefix)
        } else {
            0
        };

        let mut chunk = match self
            .buffer
            .acquire(pos + prefix_len, self.settings.acquire_timeout())
        {
            Ok(chunk) => chunk,
            Err(e) => {
                bump(&counters.dropped_lines, 1);
                bump(&counters.dropped_bytes, pos as u64);
                tracing::warn!(port, len = pos, "Failed to allocate line buffer, dropping line: {}", e);
                self.discard_line(pos);
                return;
            }
        };

        let bytes = chunk.as_mut_slice();
        bytes[..prefix_len].copy_from_slice(&prefix[..prefix_len]);
        let read = self
            .driver
            .read_bytes(&mut bytes[prefix_len..], self.settings.read_timeout());
        match read {
            Ok(n) if n == pos => {}
            Ok(n) => {
                bump(&counters.read_errors, 1);
                tracing::warn!(port, expected = pos, got = n, "Short UART read, flushing input");
                self.driver.flush_input();
                return;
            }
            Err(e) => {
                bump(&counters.read_errors, 1);
                tracing::warn!(port, "Failed to read UART: {}", e);
                self.driver.flush_input();
                return;
            }
        }

        chunk.set_prefix_len(prefix_len);
        chunk.commit();
        bump(&counters.lines_framed, 1);
        bump(&counters.bytes_framed, pos as u64);
        tracing::trace!(port, len = pos, "Line framed");

        self.discard_terminator();
    }

    /// Skip `len` payload bytes and their terminator, keeping the input after them
    fn discard_line(&mut self, len: usize) {
        let mut scratch = [0u8; DISCARD_CHUNK];
        let mut remaining = len + 1;
        while remaining > 0 {
            let want = remaining.min(DISCARD_CHUNK);
            match self
                .driver
                .read_bytes(&mut scratch[..want], self.settings.read_timeout())
            {
                Ok(n) if n > 0 => remaining -= n.min(remaining),
                Ok(_) | Err(_) => {
                    bump(&self.status.counters.read_errors, 1);
                    tracing::warn!(port = self.port, "Failed to skip dropped line, flushing input");
                    self.driver.flush_input();
                    return;
                }
            }
        }
    }

    /// Consume the terminator byte that follows a framed payload
    fn discard_terminator(&mut self) {
        let mut terminator = [0u8; 1];
        match self
            .driver
            .read_bytes(&mut terminator, self.settings.read_timeout())
        {
            Ok(1) if terminator[0] == self.settings.pattern => {}
            Ok(_) => tracing::debug!(port = self.port, "Terminator missing after line"),
            Err(e) => tracing::debug!(port = self.port, "Failed to consume terminator: {}", e),
        }
    }
}
