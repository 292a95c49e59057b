//! Core data types for uartlog-rs
//!
//! This module contains the value types shared between the configuration
//! resolver, the hardware drivers and the line pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest pin identifier a port may be wired to
pub const MAX_PIN: u8 = 48;

/// A validated pin identifier in `0..=MAX_PIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinId(u8);

impl PinId {
    /// Create a pin identifier, returning `None` if it is out of range
    pub fn new(pin: u8) -> Option<Self> {
        (pin <= MAX_PIN).then_some(Self(pin))
    }

    /// Map a raw signed value from a config document to a pin.
    ///
    /// Negative and out-of-range values mean "not connected" and are never
    /// clamped into range.
    pub fn from_raw(raw: i64) -> Option<Self> {
        u8::try_from(raw).ok().and_then(Self::new)
    }

    /// The numeric pin identifier
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    /// Match a document value exactly against 1.0, 1.5 and 2.0
    pub fn from_value(value: f64) -> Option<Self> {
        if value == 1.0 {
            Some(StopBits::One)
        } else if value == 1.5 {
            Some(StopBits::OnePointFive)
        } else if value == 2.0 {
            Some(StopBits::Two)
        } else {
            None
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OnePointFive => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    /// Match a document value against {5, 6, 7, 8}
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            5 => Some(DataBits::Five),
            6 => Some(DataBits::Six),
            7 => Some(DataBits::Seven),
            8 => Some(DataBits::Eight),
            _ => None,
        }
    }

    /// Number of bits as an integer
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::None => write!(f, "none"),
            Parity::Odd => write!(f, "odd"),
            Parity::Even => write!(f, "even"),
        }
    }
}

/// Hardware flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowControl {
    #[default]
    Disabled,
    Rts,
    Cts,
    RtsCts,
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowControl::Disabled => write!(f, "disabled"),
            FlowControl::Rts => write!(f, "rts"),
            FlowControl::Cts => write!(f, "cts"),
            FlowControl::RtsCts => write!(f, "rtscts"),
        }
    }
}

/// Fully resolved configuration of one serial port
///
/// Only the resolver constructs these, and only when every field resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub tx: Option<PinId>,
    pub rx: Option<PinId>,
    pub rts: Option<PinId>,
    pub cts: Option<PinId>,
    /// Absent, negative or above `u32::MAX` in the document reads as 0, which
    /// the driver rejects at claim time
    pub baud_rate: u32,
    pub stop_bits: StopBits,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl fmt::Display for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn pin(p: Option<PinId>) -> String {
            p.map(|p| p.get().to_string()).unwrap_or_else(|| "NC".to_string())
        }
        write!(
            f,
            "{} baud, {}{}{} flow={} (tx={}, rx={}, rts={}, cts={})",
            self.baud_rate,
            self.data_bits.bits(),
            match self.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            self.stop_bits,
            self.flow_control,
            pin(self.tx),
            pin(self.rx),
            pin(self.rts),
            pin(self.cts),
        )
    }
}

/// Lifecycle state of a line pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortState {
    /// Not started, or stopped
    #[default]
    Uninitialized,
    /// Claiming hardware and allocating the buffer
    Configuring,
    /// Event task is running
    Running,
    /// Configuration was invalid; the port is excluded from logging
    Disabled,
    /// Hardware was lost or could not be claimed
    Faulted,
}

impl PortState {
    /// Numeric encoding used for lock-free state sharing
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PortState::Uninitialized => 0,
            PortState::Configuring => 1,
            PortState::Running => 2,
            PortState::Disabled => 3,
            PortState::Faulted => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PortState::Configuring,
            2 => PortState::Running,
            3 => PortState::Disabled,
            4 => PortState::Faulted,
            _ => PortState::Uninitialized,
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Uninitialized => write!(f, "Uninitialized"),
            PortState::Configuring => write!(f, "Configuring..."),
            PortState::Running => write!(f, "Running"),
            PortState::Disabled => write!(f, "Disabled"),
            PortState::Faulted => write!(f, "Faulted"),
        }
    }
}

/// Snapshot of a pipeline's counters
///
/// Every recovery action in the event task shows up here, so data loss is
/// never silent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Lines committed to the buffer
    pub lines_framed: u64,
    /// Payload bytes committed (prefixes excluded)
    pub bytes_framed: u64,
    /// Lines discarded because buffer space could not be acquired in time
    pub dropped_lines: u64,
    /// Payload bytes discarded with those lines
    pub dropped_bytes: u64,
    /// Hardware overflow / buffer-full events (input flushed)
    pub overflow_flushes: u64,
    /// Pattern events whose position was lost (input flushed)
    pub pattern_queue_overflows: u64,
    /// Terminators with no payload in front of them
    pub empty_patterns: u64,
    /// Failed or short payload reads (input flushed)
    pub read_errors: u64,
    pub frame_errors: u64,
    pub parity_errors: u64,
    pub breaks: u64,
    pub wakeups: u64,
    pub unknown_events: u64,
    /// Driver events dropped on a full event queue
    pub dropped_events: u64,
}

impl PipelineStats {
    /// Total number of events that lost data
    pub fn data_loss_events(&self) -> u64 {
        self.dropped_lines
            + self.overflow_flushes
            + self.pattern_queue_overflows
            + self.read_errors
            + self.dropped_events
    }
}
