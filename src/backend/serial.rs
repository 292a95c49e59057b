//! Host serial-port driver
//!
//! This module implements [`UartDriver`] on a desktop serial device using the
//! `serialport` crate. A reader thread pulls bytes from the device into an
//! [`RxFifo`], performs pattern detection in software and raises the same
//! [`UartEvent`]s an on-chip UART driver would.
//!
//! # Mapping
//!
//! - Pin assignments have no meaning on a host device and are only logged
//! - 1.5 stop bits is not available and fails the claim
//! - RTS, CTS and RTS+CTS all select hardware flow control
//! - A read error other than a timeout ends the reader thread and drops the
//!   event queue, which the pipeline reports as a lost port
//!
//! # Example
//!
//! ```ignore
//! use uartlog_rs::backend::SerialDriver;
//!
//! let driver = SerialDriver::new("/dev/ttyUSB0");
//! let pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings);
//! ```

use crate::types::{DataBits, FlowControl, Parity, PortConfig, StopBits};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use serialport::{ClearBuffer, SerialPort};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::driver::{DriverOptions, HardwareError, MissedEvents, UartDriver, UartEvent};
use super::rx_fifo::RxFifo;

/// Poll interval of the reader thread
const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Size of a single device read
const READ_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Default)]
struct RxShared {
    fifo: Mutex<Option<RxFifo>>,
    data_ready: Condvar,
    /// Events the reader could not queue
    missed: Mutex<MissedEvents>,
}

/// [`UartDriver`] backed by a host serial device
pub struct SerialDriver {
    path: String,
    rx: Arc<RxShared>,
    port: Option<Box<dyn SerialPort>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialDriver {
    /// Create a driver for the device at `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rx: Arc::new(RxShared::default()),
            port: None,
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    /// Device path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// List serial devices present on this host
    pub fn list_devices() -> Vec<String> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                tracing::warn!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    fn open(&self, config: &PortConfig) -> Result<Box<dyn SerialPort>, HardwareError> {
        let stop_bits = match config.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => {
                return Err(HardwareError::Unsupported(
                    "1.5 stop bits on a host serial device".into(),
                ))
            }
        };
        let data_bits = match config.data_bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        };
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let flow_control = match config.flow_control {
            FlowControl::Disabled => serialport::FlowControl::None,
            FlowControl::Rts | FlowControl::Cts | FlowControl::RtsCts => {
                serialport::FlowControl::Hardware
            }
        };

        tracing::debug!(
            "Pins tx={:?} rx={:?} rts={:?} cts={:?} are not used on host device {}",
            config.tx,
            config.rx,
            config.rts,
            config.cts,
            self.path
        );

        serialport::new(&self.path, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .timeout(READ_POLL_INTERVAL)
            .open()
            .map_err(|e| HardwareError::Claim(format!("{}: {}", self.path, e)))
    }
}

impl UartDriver for SerialDriver {
    fn install(
        &mut self,
        config: &PortConfig,
        options: DriverOptions,
    ) -> Result<Receiver<UartEvent>, HardwareError> {
        if self.port.is_some() {
            self.uninstall();
        }

        let port = self.open(config)?;
        let reader_port = port
            .try_clone()
            .map_err(|e| HardwareError::Claim(format!("{}: {}", self.path, e)))?;

        *self.rx.fifo.lock() = Some(RxFifo::new(options.rx_buffer_size));
        *self.rx.missed.lock() = MissedEvents::default();
        let (tx, rx) = bounded(options.event_queue_len);

        self.stop.store(false, Ordering::SeqCst);
        let shared = self.rx.clone();
        let stop = self.stop.clone();
        let path = self.path.clone();
        let reader = std::thread::Builder::new()
            .name(format!("{}-rx", self.path.rsplit('/').next().unwrap_or("serial")))
            .spawn(move || reader_loop(reader_port, shared, tx, stop, path))
            .map_err(|e| HardwareError::Claim(format!("failed to spawn reader: {}", e)))?;

        self.port = Some(port);
        self.reader = Some(reader);
        tracing::info!("Opened {} ({})", self.path, config);
        Ok(rx)
    }

    fn uninstall(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::error!("Reader thread of {} panicked", self.path);
            }
        }
        if self.port.take().is_some() {
            tracing::info!("Closed {}", self.path);
        }
        *self.rx.fifo.lock() = None;
    }

    fn is_installed(&self) -> bool {
        self.port.is_some()
    }

    fn enable_pattern_detect(&mut self, pattern: u8, queue_len: usize) -> Result<(), HardwareError> {
        let mut fifo = self.rx.fifo.lock();
        let fifo = fifo.as_mut().ok_or(HardwareError::NotInstalled)?;
        fifo.set_pattern(pattern, queue_len);
        Ok(())
    }

    fn pop_pattern_position(&mut self) -> Option<usize> {
        self.rx.fifo.lock().as_mut().and_then(RxFifo::pop_pattern_position)
    }

    fn buffered_len(&self) -> usize {
        self.rx.fifo.lock().as_ref().map_or(0, RxFifo::len)
    }

    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, HardwareError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut fifo = self.rx.fifo.lock();
        loop {
            let rx = fifo.as_mut().ok_or(HardwareError::NotInstalled)?;
            if rx.len() >= buf.len() {
                return Ok(rx.read(buf));
            }
            let timed_out = match deadline {
                Some(deadline) => self.rx.data_ready.wait_until(&mut fifo, deadline).timed_out(),
                None => {
                    self.rx.data_ready.wait(&mut fifo);
                    false
                }
            };
            if timed_out {
                let rx = fifo.as_mut().ok_or(HardwareError::NotInstalled)?;
                return Ok(rx.read(buf));
            }
        }
    }

    fn flush_input(&mut self) {
        if let Some(fifo) = self.rx.fifo.lock().as_mut() {
            fifo.flush();
        }
        if let Some(port) = self.port.as_ref() {
            if let Err(e) = port.clear(ClearBuffer::Input) {
                tracing::debug!("Failed to clear {} input: {}", self.path, e);
            }
        }
    }

    fn take_missed_events(&mut self) -> MissedEvents {
        std::mem::take(&mut *self.rx.missed.lock())
    }
}

impl Drop for SerialDriver {
    fn drop(&mut self) {
        self.uninstall();
    }
}

fn reader_loop(
    mut port: Box<dyn SerialPort>,
    shared: Arc<RxShared>,
    events: Sender<UartEvent>,
    stop: Arc<AtomicBool>,
    path: String,
) {
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while !stop.load(Ordering::SeqCst) {
        let n = match port.read(&mut chunk) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!("Read from {} failed, closing port: {}", path, e);
                break;
            }
        };

        let outcome = match shared.fifo.lock().as_mut() {
            Some(fifo) => fifo.push(&chunk[..n]),
            None => break,
        };
        shared.data_ready.notify_all();

        let pending = std::iter::repeat(UartEvent::BufferFull)
            .take(outcome.overflowed as usize)
            .chain(std::iter::repeat(UartEvent::PatternDetected).take(outcome.patterns));
        for event in pending {
            match events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Handed to the event task with the next event it takes
                    record_missed(&shared.missed, event);
                    tracing::trace!("{} event queue full, dropped {:?}", path, event);
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

fn record_missed(missed: &Mutex<MissedEvents>, event: UartEvent) {
    let mut missed = missed.lock();
    match event {
        UartEvent::PatternDetected => missed.patterns += 1,
        UartEvent::BufferFull => missed.overflows += 1,
        _ => {}
    }
}
