//! Logger settings
//!
//! These settings describe the logger itself rather than the ports: where
//! the port document lives, where logs are written, which document entries
//! to bring up and how the line pipelines are sized.
//!
//! # Main Types
//!
//! - [`LoggerSettings`] - Top-level settings loaded from `uartlog.toml`
//! - [`PortSettings`] - One port to bring up (document index + device)
//! - [`PipelineSettings`] - Buffer sizes and timeouts for every pipeline
//!
//! # Example
//!
//! ```toml
//! config_path = "/sdcard/config.json"
//! output_dir = "/sdcard"
//! timestamp_lines = true
//!
//! [[ports]]
//! index = 1
//! name = "uart1"
//! device = "/dev/ttyUSB0"
//!
//! [pipeline]
//! ring_capacity = 2097152
//! acquire_timeout_ms = 300
//! ```

use crate::error::{LoggerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file name
pub const SETTINGS_FILE: &str = "uartlog.toml";

/// Default line buffer capacity (2 MiB)
pub const DEFAULT_RING_CAPACITY: usize = 2 * 1024 * 1024;

/// Default driver-side receive buffer size
pub const DEFAULT_RX_BUFFER_SIZE: usize = 8192;

/// Default depth of the hardware event queue
pub const DEFAULT_EVENT_QUEUE_LEN: usize = 20;

/// Default depth of the pattern position queue
pub const DEFAULT_PATTERN_QUEUE_LEN: usize = 20;

/// Default wait for line buffer space in milliseconds
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 300;

/// Default wait for payload bytes in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 300;

/// Line terminator
pub const DEFAULT_PATTERN: u8 = b'\n';

/// Top-level logger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Path to the JSON port document
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Directory that receives one `<name>.log` per port
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Optional directory for the logger's own diagnostic log
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Prefix every line with a timestamp
    #[serde(default = "default_true")]
    pub timestamp_lines: bool,

    /// Ports to bring up
    #[serde(default = "default_ports")]
    pub ports: Vec<PortSettings>,

    /// Pipeline sizing and timeouts
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

fn default_config_path() -> PathBuf {
    PathBuf::from(super::DEFAULT_CONFIG_PATH)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/sdcard")
}

fn default_true() -> bool {
    true
}

fn default_ports() -> Vec<PortSettings> {
    vec![PortSettings::new(1, "uart1"), PortSettings::new(2, "uart2")]
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            output_dir: default_output_dir(),
            log_dir: None,
            timestamp_lines: true,
            ports: default_ports(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoggerError::Settings(format!("Failed to read settings {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| e.with_context(format!("Invalid settings file {:?}", path)))
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| LoggerError::Settings(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings, returning defaults if the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Serialize settings to TOML text
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LoggerError::Settings(format!("Failed to serialize settings: {}", e)))
    }

    /// Check for duplicate port names and nonsensical pipeline sizes
    pub fn validate(&self) -> Result<()> {
        for (i, port) in self.ports.iter().enumerate() {
            if port.name.is_empty() {
                return Err(LoggerError::Settings(format!(
                    "Port entry {} has an empty name",
                    i
                )));
            }
            if self.ports[..i].iter().any(|p| p.name == port.name) {
                return Err(LoggerError::Settings(format!(
                    "Duplicate port name '{}'",
                    port.name
                )));
            }
        }
        self.pipeline.validate()
    }

    /// Path of the log file written for `port`
    pub fn log_path(&self, port: &PortSettings) -> PathBuf {
        self.output_dir.join(format!("{}.log", port.name))
    }
}

/// One port to bring up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    /// Index into the document's `uart` array
    pub index: usize,

    /// Name used for the event task and the log file
    pub name: String,

    /// Host serial device backing this port (e.g. `/dev/ttyUSB0`)
    #[serde(default)]
    pub device: Option<String>,
}

impl PortSettings {
    /// Create port settings without a device
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            device: None,
        }
    }

    /// Set the backing device
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// Sizing and timeouts of a line pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Capacity of the framed line buffer in bytes
    pub ring_capacity: usize,

    /// Driver-side receive buffer size in bytes
    pub rx_buffer_size: usize,

    /// Depth of the hardware event queue
    pub event_queue_len: usize,

    /// Depth of the pattern position queue
    pub pattern_queue_len: usize,

    /// Bounded wait for line buffer space
    pub acquire_timeout_ms: u64,

    /// Bounded wait for payload bytes
    pub read_timeout_ms: u64,

    /// Line terminator byte
    pub pattern: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            event_queue_len: DEFAULT_EVENT_QUEUE_LEN,
            pattern_queue_len: DEFAULT_PATTERN_QUEUE_LEN,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            pattern: DEFAULT_PATTERN,
        }
    }
}

impl PipelineSettings {
    /// Bounded wait for line buffer space
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Bounded wait for payload bytes
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        let checks = [
            (self.ring_capacity, "ring_capacity"),
            (self.rx_buffer_size, "rx_buffer_size"),
            (self.event_queue_len, "event_queue_len"),
            (self.pattern_queue_len, "pattern_queue_len"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(LoggerError::Settings(format!("pipeline.{} must be > 0", name)));
            }
        }
        Ok(())
    }
}
