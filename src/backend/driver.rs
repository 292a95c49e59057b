//! UartDriver trait for a unified hardware interface
//!
//! This module provides the common trait for all UART driver implementations,
//! enabling both real serial hardware and the mock driver used for testing.
//! A driver owns the port's receive FIFO and pattern detector and reports
//! activity through a bounded event queue.

use crate::types::PortConfig;
use crossbeam_channel::Receiver;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a UART driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// The port could not be opened or configured
    #[error("failed to claim port: {0}")]
    Claim(String),

    /// The requested setting is not available on this hardware
    #[error("unsupported setting: {0}")]
    Unsupported(String),

    /// A transfer failed
    #[error("I/O error: {0}")]
    Io(String),

    /// An operation needed an installed driver
    #[error("driver not installed")]
    NotInstalled,

    /// The port handle is no longer valid
    #[error("port disconnected")]
    Disconnected,
}

/// Hardware-level receive events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartEvent {
    /// Break condition on the line
    Break,
    /// The hardware FIFO overflowed
    FifoOverflow,
    /// The driver's receive buffer is full
    BufferFull,
    /// Framing error
    FrameError,
    /// Parity error
    ParityError,
    /// A terminator byte was detected; pop its position from the driver
    PatternDetected,
    /// Wake-up from light sleep
    Wakeup,
    /// Any other driver event, identified by a raw code
    Other(u32),
}

/// Events a driver could not queue because the event queue was full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissedEvents {
    /// Dropped [`UartEvent::PatternDetected`]; their positions stay queued
    pub patterns: usize,
    /// Dropped [`UartEvent::BufferFull`]
    pub overflows: usize,
}

impl MissedEvents {
    pub fn total(&self) -> u64 {
        (self.patterns + self.overflows) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.patterns == 0 && self.overflows == 0
    }
}

/// Sizes passed to [`UartDriver::install`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Receive buffer size in bytes
    pub rx_buffer_size: usize,
    /// Depth of the event queue
    pub event_queue_len: usize,
}

/// Unified interface for UART drivers
///
/// The line pipeline installs the driver once per start, then hands it to
/// its event task, which is the only user until the task exits. Implementations
/// must be `Send` to move across that thread boundary.
///
/// Dropping every sender of the event queue signals that the port was lost.
///
/// # Example
///
/// ```ignore
/// let events = driver.install(&config, options)?;
/// driver.enable_pattern_detect(b'\n', 20)?;
/// while let Ok(UartEvent::PatternDetected) = events.recv() {
///     if let Some(pos) = driver.pop_pattern_position() {
///         let mut line = vec![0; pos];
///         driver.read_bytes(&mut line, Duration::from_millis(300))?;
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait UartDriver: Send {
    /// Claim the port with `config` and return its event queue
    fn install(
        &mut self,
        config: &PortConfig,
        options: DriverOptions,
    ) -> Result<Receiver<UartEvent>, HardwareError>;

    /// Release the port. Safe to call when not installed.
    fn uninstall(&mut self);

    /// Check if the port is claimed
    fn is_installed(&self) -> bool;

    /// Arm detection of `pattern` with room for `queue_len` positions
    fn enable_pattern_detect(&mut self, pattern: u8, queue_len: usize) -> Result<(), HardwareError>;

    /// Pop the oldest detected pattern position
    ///
    /// The position is an offset from the current read position. `None` means
    /// the position queue overflowed and the position was lost.
    fn pop_pattern_position(&mut self) -> Option<usize>;

    /// Number of bytes waiting in the receive buffer
    fn buffered_len(&self) -> usize;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, HardwareError>;

    /// Discard all buffered input and pending pattern positions
    fn flush_input(&mut self);

    /// Take the events dropped on a full event queue since the last call
    fn take_missed_events(&mut self) -> MissedEvents;
}

impl std::fmt::Debug for dyn UartDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UartDriver")
            .field("installed", &self.is_installed())
            .field("buffered", &self.buffered_len())
            .finish()
    }
}
