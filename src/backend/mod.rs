//! Backend module: UART drivers and the per-port event task
//!
//! Everything that touches a serial port lives here. The line pipeline only
//! sees the [`UartDriver`] trait, so the same event task runs against real
//! hardware and against the in-memory mock.
//!
//! # Components
//!
//! - [`UartDriver`] - Hardware collaborator trait (claim, pattern detection, reads)
//! - [`SerialDriver`] - Host serial devices via the `serialport` crate
//! - [`MockUart`] - Scriptable in-memory driver for tests and simulation
//! - [`RxFifo`] - Receive FIFO with pattern detection shared by both drivers
//! - [`EventWorker`] - The event loop that frames lines into a port's buffer
//!
//! # Example
//!
//! ```ignore
//! use uartlog_rs::backend::{MockUart, UartDriver};
//!
//! let driver = MockUart::new();
//! let feeder = driver.handle();
//! let mut pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings);
//! pipeline.start(resolved)?;
//!
//! feeder.feed_lines(["boot ok", "temp=21.5"]);
//! ```

pub mod driver;
pub mod mock_uart;
pub mod rx_fifo;
pub mod serial;
pub mod worker;

pub use driver::{DriverOptions, HardwareError, MissedEvents, UartDriver, UartEvent};
pub use mock_uart::{MockUart, MockUartHandle};
pub use rx_fifo::{PushOutcome, RxFifo};
pub use serial::SerialDriver;
pub use worker::{EventWorker, PortCounters, PortStatus, WorkerExit};
