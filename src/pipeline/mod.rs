//! Per-port line pipeline
//!
//! A [`LinePipeline`] owns one port's driver and turns its byte stream into
//! framed lines held in a bounded [`FramedBuffer`]. Consumers pull lines
//! through the pipeline itself or through a cloneable [`LineReceiver`].
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──start(Ok)──► Configuring ──► Running ──port lost──► Faulted
//!       │                           │                                    │
//!       └──start(Err)──► Disabled   └──claim/alloc failed──► Faulted     │
//!                                                                        │
//!       ◄───────────────────────────── stop() ◄──────────────────────────┘
//! ```
//!
//! - `start` with a failed resolution disables the port: no hardware is
//!   claimed and the resolver's error is returned
//! - There is no automatic restart; call `start` again
//! - [`LinePipeline::stop`] (also run on drop) shuts the event task down and
//!   releases the port
//!
//! # Example
//!
//! ```ignore
//! let mut pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings);
//! pipeline.start(config::resolve(&document, 1))?;
//!
//! loop {
//!     match pipeline.receive_line(Duration::from_millis(100)) {
//!         Ok(line) => {
//!             sink.write_all(line.as_bytes())?;
//!             pipeline.release_line(line);
//!         }
//!         Err(RecvError::Timeout) => continue,
//!         Err(e) => break,
//!     }
//! }
//! ```

pub mod framed_buffer;
pub mod timestamp;

pub use framed_buffer::{
    AcquireError, AllocError, FramedBuffer, FramedChunk, ReceiveError, WritableChunk, WAIT_FOREVER,
};

use crate::backend::{
    DriverOptions, EventWorker, HardwareError, PortStatus, UartDriver, UartEvent,
};
use crate::config::PipelineSettings;
use crate::error::{ConfigError, PipelineError, RecvError};
use crate::types::{PipelineStats, PortConfig, PortState};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A framed line. Its buffer space is given back when it is dropped or
/// passed to [`LinePipeline::release_line`].
pub type Line = FramedChunk;

/// Consumer-side handle to a pipeline's lines
///
/// Stays valid across restarts of the pipeline it came from.
#[derive(Debug, Clone)]
pub struct LineReceiver {
    index: usize,
    status: Arc<PortStatus>,
    buffer: Arc<Mutex<Option<FramedBuffer>>>,
}

impl LineReceiver {
    /// Port index this receiver reads from
    pub fn port_index(&self) -> usize {
        self.index
    }

    /// Wait up to `timeout` for the next line
    ///
    /// Lines committed before a fault can still be drained; once none are
    /// left, the fault is reported. A wait in progress ends as soon as the
    /// port faults or is stopped, even with [`WAIT_FOREVER`].
    pub fn receive_line(&self, timeout: Duration) -> Result<Line, RecvError> {
        let buffer = self.buffer.lock().clone();
        match self.status.state() {
            PortState::Running => {
                let buffer = buffer.ok_or(RecvError::NotRunning)?;
                buffer.receive(timeout).map_err(|e| match e {
                    ReceiveError::Timeout => RecvError::Timeout,
                    ReceiveError::Closed => self.closed_error(),
                })
            }
            PortState::Faulted => buffer
                .and_then(|b| b.try_receive())
                .ok_or_else(|| self.fault_error()),
            _ => Err(RecvError::NotRunning),
        }
    }

    /// Error for a buffer the event task closed on its way out
    fn closed_error(&self) -> RecvError {
        match self.status.state() {
            PortState::Faulted => self.fault_error(),
            _ => RecvError::NotRunning,
        }
    }

    fn fault_error(&self) -> RecvError {
        RecvError::Faulted(self.status.fault().unwrap_or_else(|| "unknown fault".into()))
    }

    /// Give a line's space back to the buffer
    pub fn release_line(&self, line: Line) {
        line.release();
    }

    /// Toggle timestamp prefixes for lines framed from now on
    pub fn set_timestamp_prefix(&self, enabled: bool) {
        self.status.set_timestamps(enabled);
    }

    pub fn state(&self) -> PortState {
        self.status.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.status.stats()
    }
}

struct RunningTask {
    shutdown: Sender<()>,
    handle: JoinHandle<Box<dyn UartDriver>>,
}

/// One port's driver, event task and line buffer
pub struct LinePipeline {
    index: usize,
    name: String,
    settings: PipelineSettings,
    /// `None` while the event task owns the driver
    driver: Option<Box<dyn UartDriver>>,
    config: Option<PortConfig>,
    task: Option<RunningTask>,
    receiver: LineReceiver,
}

impl LinePipeline {
    /// Create an idle pipeline for port `index`
    ///
    /// Timestamp prefixes start enabled.
    pub fn new(
        index: usize,
        name: impl Into<String>,
        driver: Box<dyn UartDriver>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            settings,
            driver: Some(driver),
            config: None,
            task: None,
            receiver: LineReceiver {
                index,
                status: Arc::new(PortStatus::new(true)),
                buffer: Arc::new(Mutex::new(None)),
            },
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the port is running with
    pub fn config(&self) -> Option<PortConfig> {
        self.config
    }

    pub fn state(&self) -> PortState {
        self.receiver.state()
    }

    /// Why the port faulted, if it did
    pub fn fault(&self) -> Option<String> {
        match self.state() {
            PortState::Faulted => self.receiver.status.fault(),
            _ => None,
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.state() == PortState::Faulted
    }

    pub fn stats(&self) -> PipelineStats {
        self.receiver.stats()
    }

    /// Get a cloneable consumer handle
    pub fn handle(&self) -> LineReceiver {
        self.receiver.clone()
    }

    /// Claim the port and start framing lines
    ///
    /// `resolved` is the outcome of resolving this port's configuration. An
    /// error disables the port and is returned as is.
    pub fn start(&mut self, resolved: Result<PortConfig, ConfigError>) -> Result<(), PipelineError> {
        let status = self.receiver.status.clone();
        if self.task.is_some() && status.state() == PortState::Running {
            return Err(PipelineError::AlreadyRunning);
        }
        // A task left over from a fault is exiting or gone; take the driver back
        self.join_task();

        let config = match resolved {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(port = self.index, "{} not configured: {}", self.name, e);
                self.config = None;
                status.set_state(PortState::Disabled);
                return Err(e.into());
            }
        };

        status.clear_fault();
        status.set_state(PortState::Configuring);
        if config.baud_rate == 0 {
            tracing::debug!(
                port = self.index,
                "{} has baud rate 0; the document value was missing or out of range",
                self.name
            );
        }

        let Some(mut driver) = self.driver.take() else {
            status.set_fault("driver lost by a previous event task");
            return Err(HardwareError::Disconnected.into());
        };

        let (events, buffer) = match self.claim(driver.as_mut(), &config) {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(port = self.index, "{} failed to start: {}", self.name, e);
                self.driver = Some(driver);
                status.set_fault(e.to_string());
                return Err(e);
            }
        };
        tracing::info!(port = self.index, "{} configured: {}", self.name, config);

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let worker = EventWorker::new(
            self.index,
            driver,
            events,
            shutdown_rx,
            buffer.clone(),
            status.clone(),
            self.settings,
        );
        *self.receiver.buffer.lock() = Some(buffer);
        self.config = Some(config);
        // Set before spawning so a fault raised right away is not overwritten
        status.set_state(PortState::Running);

        let spawned = std::thread::Builder::new()
            .name(format!("{}-events", self.name))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.task = Some(RunningTask {
                    shutdown: shutdown_tx,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                tracing::error!(port = self.index, "Failed to create event task: {}", e);
                if let Some(buffer) = self.receiver.buffer.lock().take() {
                    buffer.close();
                }
                status.set_fault(format!("failed to spawn event task: {}", e));
                Err(PipelineError::Spawn(e))
            }
        }
    }

    /// Install the driver, arm pattern detection and allocate the buffer
    fn claim(
        &self,
        driver: &mut dyn UartDriver,
        config: &PortConfig,
    ) -> Result<(Receiver<UartEvent>, FramedBuffer), PipelineError> {
        let options = DriverOptions {
            rx_buffer_size: self.settings.rx_buffer_size,
            event_queue_len: self.settings.event_queue_len,
        };
        let events = driver.install(config, options)?;

        let armed = driver.enable_pattern_detect(self.settings.pattern, self.settings.pattern_queue_len);
        if let Err(e) = armed {
            driver.uninstall();
            return Err(e.into());
        }

        match FramedBuffer::with_capacity(self.settings.ring_capacity) {
            Ok(buffer) => Ok((events, buffer)),
            Err(e) => {
                tracing::error!(port = self.index, "Line buffer alloc failed: {}", e);
                driver.uninstall();
                Err(PipelineError::BufferAlloc {
                    capacity: e.capacity,
                })
            }
        }
    }

    fn join_task(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        drop(task.shutdown);
        match task.handle.join() {
            Ok(mut driver) => {
                driver.uninstall();
                self.driver = Some(driver);
            }
            Err(_) => {
                tracing::error!(port = self.index, "{} event task panicked", self.name);
            }
        }
    }

    /// Stop the event task, release the port and return to `Uninitialized`
    ///
    /// Lines already handed out stay valid. Safe to call in any state.
    pub fn stop(&mut self) {
        if self.task.is_some() {
            self.join_task();
            tracing::info!(port = self.index, "{} stopped", self.name);
        }
        if let Some(buffer) = self.receiver.buffer.lock().take() {
            buffer.close();
        }
        self.config = None;
        self.receiver.status.clear_fault();
        self.receiver.status.set_state(PortState::Uninitialized);
    }

    /// Wait up to `timeout` for the next line
    pub fn receive_line(&self, timeout: Duration) -> Result<Line, RecvError> {
        self.receiver.receive_line(timeout)
    }

    /// Give a line's space back to the buffer
    pub fn release_line(&self, line: Line) {
        self.receiver.release_line(line);
    }

    /// Toggle timestamp prefixes for lines framed from now on
    pub fn set_timestamp_prefix(&mut self, enabled: bool) {
        self.receiver.set_timestamp_prefix(enabled);
    }

    /// Check if timestamp prefixes are enabled
    pub fn timestamp_prefix(&self) -> bool {
        self.receiver.status.timestamps_enabled()
    }
}

impl Drop for LinePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LinePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinePipeline")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::MockUartDriver;
    use crate::backend::MockUart;
    use crate::config::resolve_value;
    use serde_json::json;

    fn config() -> PortConfig {
        resolve_value(
            &json!({"uart": [{"tx_pin": 4, "rx_pin": 5, "baudRate": 115200, "stopBit": 1, "dataBit": 8}]}),
            0,
        )
        .unwrap()
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            ring_capacity: 1024,
            acquire_timeout_ms: 20,
            read_timeout_ms: 20,
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn test_config_error_disables_without_claiming() {
        let mut driver = MockUartDriver::new();
        driver.expect_install().never();
        driver.expect_uninstall().return_const(());
        let mut pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings());

        let err = pipeline
            .start(Err(ConfigError::InvalidStopBits(1.2)))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::InvalidStopBits(v)) if v == 1.2
        ));
        assert_eq!(pipeline.state(), PortState::Disabled);
        assert_eq!(pipeline.config(), None);
        assert_eq!(
            pipeline.receive_line(Duration::ZERO).unwrap_err(),
            RecvError::NotRunning
        );
    }

    #[test]
    fn test_claim_failure_faults_and_keeps_driver() {
        let driver = MockUart::new();
        let handle = driver.handle();
        handle.fail_next_install(HardwareError::Claim("pins in use".into()));
        let mut pipeline = LinePipeline::new(2, "uart2", Box::new(driver), settings());

        let err = pipeline.start(Ok(config())).unwrap_err();
        assert!(matches!(err, PipelineError::Hardware(HardwareError::Claim(_))));
        assert!(pipeline.is_faulted());
        assert!(pipeline.fault().unwrap().contains("pins in use"));

        // Explicit retry succeeds with the same driver
        pipeline.start(Ok(config())).unwrap();
        assert_eq!(pipeline.state(), PortState::Running);
        assert_eq!(pipeline.fault(), None);
        assert_eq!(handle.install_count(), 1);
    }

    #[test]
    fn test_buffer_alloc_failure_releases_port() {
        let driver = MockUart::new();
        let handle = driver.handle();
        let settings = PipelineSettings {
            ring_capacity: 0,
            ..settings()
        };
        let mut pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings);

        let err = pipeline.start(Ok(config())).unwrap_err();
        assert!(matches!(err, PipelineError::BufferAlloc { capacity: 0 }));
        assert!(pipeline.is_faulted());
        assert!(!handle.is_installed());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let driver = MockUart::new();
        let mut pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings());
        pipeline.start(Ok(config())).unwrap();
        assert!(matches!(
            pipeline.start(Ok(config())),
            Err(PipelineError::AlreadyRunning)
        ));
        assert_eq!(pipeline.state(), PortState::Running);
    }

    #[test]
    fn test_stop_releases_port() {
        let driver = MockUart::new();
        let handle = driver.handle();
        let mut pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings());

        pipeline.start(Ok(config())).unwrap();
        assert_eq!(handle.installed_config(), Some(config()));

        pipeline.stop();
        assert_eq!(pipeline.state(), PortState::Uninitialized);
        assert!(!handle.is_installed());
        assert_eq!(
            pipeline.receive_line(Duration::ZERO).unwrap_err(),
            RecvError::NotRunning
        );
    }

    #[test]
    fn test_drop_stops_event_task() {
        let driver = MockUart::new();
        let handle = driver.handle();
        {
            let mut pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings());
            pipeline.start(Ok(config())).unwrap();
            assert!(handle.is_installed());
        }
        assert!(!handle.is_installed());
    }

    #[test]
    fn test_timestamp_prefix_defaults_on() {
        let driver = MockUart::new();
        let mut pipeline = LinePipeline::new(1, "uart1", Box::new(driver), settings());
        assert!(pipeline.timestamp_prefix());
        pipeline.set_timestamp_prefix(false);
        assert!(!pipeline.timestamp_prefix());
    }
}
