//! Logging session: one pipeline and log writer per configured port
//!
//! [`LoggerSession`] is the composition root of the logger. It owns every
//! port explicitly; nothing is reachable through globals.
//!
//! # Startup
//!
//! 1. Create the output directory
//! 2. Load and parse the JSON port document (the parsed document lives only
//!    for the duration of the call)
//! 3. For every configured port: resolve its entry, start its pipeline and
//!    spawn a [`LineWriter`] into `<output_dir>/<name>.log`
//!
//! A port whose entry does not resolve, or whose hardware cannot be claimed,
//! is logged and left out; the remaining ports keep logging.
//!
//! # Example
//!
//! ```ignore
//! let settings = LoggerSettings::load_or_default("uartlog.toml")?;
//! let mut session = LoggerSession::open(settings, |port| {
//!     Box::new(SerialDriver::new(port.device.clone().unwrap_or_default()))
//! })?;
//!
//! // ... later, after editing config.json
//! session.reload()?;
//!
//! for report in session.shutdown() {
//!     println!("{}", report);
//! }
//! ```

pub mod writer;

pub use writer::{LineWriter, WriterStats};

use crate::backend::UartDriver;
use crate::config::{self, ConfigDocument, LoggerSettings, PortSettings};
use crate::error::{LoggerError, Result, ResultExt};
use crate::pipeline::{LinePipeline, LineReceiver};
use crate::types::{PipelineStats, PortState};
use std::fmt;

/// Summary of one port
#[derive(Debug, Clone, PartialEq)]
pub struct PortReport {
    pub index: usize,
    pub name: String,
    pub state: PortState,
    pub pipeline: PipelineStats,
    pub writer: WriterStats,
    /// Why the port is not logging, if it is not
    pub error: Option<String>,
}

impl fmt::Display for PortReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} lines framed, {} lines written ({} bytes), {} dropped",
            self.name,
            self.state,
            self.pipeline.lines_framed,
            self.writer.lines_written,
            self.writer.bytes_written,
            self.pipeline.dropped_lines
        )?;
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

struct PortSlot {
    settings: PortSettings,
    pipeline: LinePipeline,
    writer: Option<LineWriter>,
    /// Totals of writers from earlier runs of this port
    written: WriterStats,
    error: Option<String>,
}

impl PortSlot {
    fn writer_stats(&self) -> WriterStats {
        let current = self.writer.as_ref().map(LineWriter::stats).unwrap_or_default();
        WriterStats {
            lines_written: self.written.lines_written + current.lines_written,
            bytes_written: self.written.bytes_written + current.bytes_written,
        }
    }

    fn report(&self) -> PortReport {
        PortReport {
            index: self.settings.index,
            name: self.settings.name.clone(),
            state: self.pipeline.state(),
            pipeline: self.pipeline.stats(),
            writer: self.writer_stats(),
            error: self.pipeline.fault().or_else(|| self.error.clone()),
        }
    }

    /// Drain and stop the writer, then stop the pipeline
    fn stop(&mut self) {
        if let Some(writer) = self.writer.take() {
            match writer.stop() {
                Ok(stats) => {
                    self.written.lines_written += stats.lines_written;
                    self.written.bytes_written += stats.bytes_written;
                }
                Err(e) => tracing::error!(port = self.settings.index, "{}", e),
            }
        }
        self.pipeline.stop();
    }
}

/// The running logger
pub struct LoggerSession {
    settings: LoggerSettings,
    ports: Vec<PortSlot>,
}

impl LoggerSession {
    /// Bring up every configured port
    ///
    /// `make_driver` is called once per port. Fails only if the settings are
    /// invalid, the output directory cannot be created or the port document
    /// cannot be loaded; per-port failures degrade that port only.
    pub fn open<F>(settings: LoggerSettings, mut make_driver: F) -> Result<Self>
    where
        F: FnMut(&PortSettings) -> Box<dyn UartDriver>,
    {
        settings.validate()?;
        std::fs::create_dir_all(&settings.output_dir).with_context(|| {
            format!(
                "Can't set up output directory {}",
                settings.output_dir.display()
            )
        })?;

        let document = load(&settings)?;

        let ports = settings
            .ports
            .iter()
            .map(|port| PortSlot {
                settings: port.clone(),
                pipeline: LinePipeline::new(
                    port.index,
                    port.name.clone(),
                    make_driver(port),
                    settings.pipeline,
                ),
                writer: None,
                written: WriterStats::default(),
                error: None,
            })
            .collect();

        let mut session = Self { settings, ports };
        session.start_ports(&document);
        Ok(session)
    }

    fn start_ports(&mut self, document: &ConfigDocument) {
        for slot in &mut self.ports {
            let index = slot.settings.index;
            slot.error = None;
            slot.pipeline
                .set_timestamp_prefix(self.settings.timestamp_lines);

            if let Err(e) = slot.pipeline.start(config::resolve(document, index)) {
                tracing::warn!(port = index, "{} not configured: {}", slot.settings.name, e);
                slot.error = Some(e.to_string());
                continue;
            }

            let path = self.settings.log_path(&slot.settings);
            match LineWriter::spawn(slot.pipeline.handle(), &path) {
                Ok(writer) => slot.writer = Some(writer),
                Err(e) => {
                    tracing::error!(port = index, "{}", e);
                    slot.error = Some(e.to_string());
                    slot.pipeline.stop();
                }
            }
        }

        tracing::info!(
            "{} of {} ports logging",
            self.running_ports(),
            self.ports.len()
        );
    }

    /// Re-read the port document and restart every port with its new entry
    ///
    /// If the document cannot be loaded the ports keep running unchanged.
    pub fn reload(&mut self) -> Result<()> {
        let document = load(&self.settings).context("Reload failed, keeping current ports")?;
        for slot in &mut self.ports {
            slot.stop();
        }
        self.start_ports(&document);
        Ok(())
    }

    /// Stop every port and report the final totals
    pub fn shutdown(mut self) -> Vec<PortReport> {
        self.stop_all();
        self.reports()
    }

    fn stop_all(&mut self) {
        for slot in &mut self.ports {
            slot.stop();
        }
    }

    pub fn settings(&self) -> &LoggerSettings {
        &self.settings
    }

    /// Number of ports currently running
    pub fn running_ports(&self) -> usize {
        self.ports
            .iter()
            .filter(|slot| slot.pipeline.state() == PortState::Running)
            .count()
    }

    pub fn reports(&self) -> Vec<PortReport> {
        self.ports.iter().map(PortSlot::report).collect()
    }

    /// Report for the port named `name`
    pub fn report(&self, name: &str) -> Option<PortReport> {
        self.slot(name).map(PortSlot::report)
    }

    /// Pipeline of the port named `name`
    pub fn pipeline(&self, name: &str) -> Option<&LinePipeline> {
        self.slot(name).map(|slot| &slot.pipeline)
    }

    /// Consumer handle for the port named `name`
    pub fn receiver(&self, name: &str) -> Option<LineReceiver> {
        self.pipeline(name).map(LinePipeline::handle)
    }

    /// Toggle timestamp prefixes on every port
    pub fn set_timestamp_prefix(&mut self, enabled: bool) {
        self.settings.timestamp_lines = enabled;
        for slot in &mut self.ports {
            slot.pipeline.set_timestamp_prefix(enabled);
        }
    }

    fn slot(&self, name: &str) -> Option<&PortSlot> {
        self.ports.iter().find(|slot| slot.settings.name == name)
    }
}

impl Drop for LoggerSession {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl fmt::Debug for LoggerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerSession")
            .field("config_path", &self.settings.config_path)
            .field("ports", &self.ports.iter().map(|s| &s.pipeline).collect::<Vec<_>>())
            .finish()
    }
}

fn load(settings: &LoggerSettings) -> Result<ConfigDocument> {
    config::load_document(&settings.config_path).map_err(|e| {
        tracing::error!("Failed to load port config {}: {}", settings.config_path.display(), e);
        LoggerError::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockUart, MockUartHandle};
    use crate::config::PipelineSettings;
    use std::collections::HashMap;
    use std::path::Path;

    fn write_document(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
    }

    fn settings_in(dir: &Path) -> LoggerSettings {
        LoggerSettings {
            config_path: dir.join("config.json"),
            output_dir: dir.join("logs"),
            timestamp_lines: false,
            pipeline: PipelineSettings {
                ring_capacity: 4096,
                ..PipelineSettings::default()
            },
            ..LoggerSettings::default()
        }
    }

    fn open_with_mocks(settings: LoggerSettings) -> (Result<LoggerSession>, HashMap<String, MockUartHandle>) {
        let mut handles = HashMap::new();
        let session = LoggerSession::open(settings, |port| {
            let driver = MockUart::new();
            handles.insert(port.name.clone(), driver.handle());
            Box::new(driver)
        });
        (session, handles)
    }

    const TWO_PORTS: &str = r#"{"uart": [
        {"baudRate": 9600, "stopBit": 1, "dataBit": 8},
        {"tx_pin": 17, "rx_pin": 16, "baudRate": 115200, "stopBit": 1, "dataBit": 8},
        {"tx_pin": 4, "rx_pin": 5, "baudRate": 57600, "stopBit": 2, "dataBit": 7, "parity": "even"}
    ]}"#;

    #[test]
    fn test_open_starts_configured_ports() {
        let dir = tempfile::tempdir().unwrap();
        write_document(&dir.path().join("config.json"), TWO_PORTS);
        let (session, handles) = open_with_mocks(settings_in(dir.path()));
        let session = session.unwrap();

        assert_eq!(session.running_ports(), 2);
        assert_eq!(handles["uart1"].installed_config().unwrap().baud_rate, 115200);
        assert_eq!(handles["uart2"].installed_config().unwrap().baud_rate, 57600);
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_invalid_port_is_left_out() {
        let dir = tempfile::tempdir().unwrap();
        write_document(
            &dir.path().join("config.json"),
            r#"{"uart": [{}, {"baudRate": 9600, "stopBit": 1.2, "dataBit": 8},
                {"baudRate": 9600, "stopBit": 1, "dataBit": 8}]}"#,
        );
        let (session, handles) = open_with_mocks(settings_in(dir.path()));
        let session = session.unwrap();

        assert_eq!(session.running_ports(), 1);
        let report = session.report("uart1").unwrap();
        assert_eq!(report.state, PortState::Disabled);
        assert!(report.error.unwrap().contains("invalid stop bit config: 1.2"));
        assert!(!handles["uart1"].is_installed());
        assert!(handles["uart2"].is_installed());
    }

    #[test]
    fn test_missing_document_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = open_with_mocks(settings_in(dir.path()));
        assert!(matches!(session.unwrap_err(), LoggerError::Load(_)));
    }

    #[test]
    fn test_shutdown_reports_written_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_document(&dir.path().join("config.json"), TWO_PORTS);
        let (session, handles) = open_with_mocks(settings_in(dir.path()));
        let session = session.unwrap();

        handles["uart1"].feed_lines(["a", "b", "c"]);
        let receiver_stats = || session.report("uart1").unwrap().writer.lines_written;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while receiver_stats() < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let reports = session.shutdown();
        let uart1 = reports.iter().find(|r| r.name == "uart1").unwrap();
        assert_eq!(uart1.writer.lines_written, 3);
        assert_eq!(uart1.state, PortState::Uninitialized);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("logs/uart1.log")).unwrap(),
            "a\nb\nc\n"
        );
    }
}
