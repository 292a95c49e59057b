//! # uartlog-rs: Multi-port UART line logger
//!
//! Reads per-port serial settings from a JSON document, frames each port's
//! byte stream into lines on a terminator byte and writes them to one log
//! file per port. Every port has its own event task and bounded line buffer,
//! so a slow or failing port never stalls the others.
//!
//! ## Architecture
//!
//! - **Config**: Loads the JSON port document and resolves a port entry into
//!   a validated [`PortConfig`]
//! - **Backend**: UART drivers (host serial devices or an in-memory mock) and
//!   the per-port event task that frames lines
//! - **Pipeline**: The bounded [`FramedBuffer`] and the [`LinePipeline`]
//!   lifecycle consumers pull lines from
//! - **Session**: The composition root wiring one pipeline and log writer per
//!   configured port
//!
//! ## Example
//!
//! ```ignore
//! use uartlog_rs::{backend::MockUart, config::LoggerSettings, session::LoggerSession};
//!
//! let settings = LoggerSettings::load_or_default("uartlog.toml")?;
//! let session = LoggerSession::open(settings, |_| Box::new(MockUart::new()))?;
//!
//! // ... run ...
//!
//! for report in session.shutdown() {
//!     tracing::info!("{}", report);
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use backend::{HardwareError, MockUart, SerialDriver, UartDriver, UartEvent};
pub use config::{resolve, ConfigDocument, LoggerSettings, PipelineSettings, PortSettings};
pub use error::{ConfigError, LoggerError, PipelineError, RecvError, Result, ResultExt};
pub use pipeline::{FramedBuffer, Line, LinePipeline, LineReceiver};
pub use session::{LineWriter, LoggerSession, PortReport};
pub use types::{
    DataBits, FlowControl, Parity, PinId, PipelineStats, PortConfig, PortState, StopBits, MAX_PIN,
};
