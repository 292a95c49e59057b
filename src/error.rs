//! Error handling for uartlog-rs
//!
//! Each layer has its own error enum so callers can branch on exactly the
//! failures that layer produces. [`LoggerError`] wraps all of them for the
//! session and binary, together with a [`Result`] alias and a context
//! extension trait.

use crate::backend::HardwareError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a port's JSON entry could not be turned into a [`crate::PortConfig`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The `uart` key is missing or is not an array
    #[error("'uart' object isn't an array")]
    NotAnArray,

    /// The `uart` array has no entries
    #[error("'uart' array is empty")]
    EmptyArray,

    /// No object at the requested index
    #[error("invalid or missing config for UART port {0}")]
    MissingPortEntry(usize),

    /// `stopBit` is not exactly 1, 1.5 or 2
    #[error("invalid stop bit config: {0}")]
    InvalidStopBits(f64),

    /// `dataBit` is not 5, 6, 7 or 8
    #[error("invalid data bit config: {0}")]
    InvalidDataBits(i64),
}

/// Failures of the document loading collaborator
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is at or above the maximum document size
    #[error("config file too big: {size} bytes (limit {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("config file is empty")]
    Empty,

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures of [`crate::pipeline::LinePipeline::start`]
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Resolution failed earlier; the port stays disabled
    #[error("port not configured: {0}")]
    Config(#[from] ConfigError),

    /// The driver could not be installed or armed
    #[error("hardware claim failed: {0}")]
    Hardware(#[from] HardwareError),

    /// The line buffer could not be created
    #[error("failed to allocate a {capacity} byte line buffer")]
    BufferAlloc { capacity: usize },

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("failed to spawn event task: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Outcome of a consumer-side wait that produced no line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecvError {
    /// Nothing arrived before the deadline
    #[error("timed out waiting for a line")]
    Timeout,

    /// The pipeline was never started, was stopped, or is disabled
    #[error("pipeline is not running")]
    NotRunning,

    /// The event task died; the string is the fault reason
    #[error("pipeline faulted: {0}")]
    Faulted(String),
}

/// Main error type for uartlog-rs operations
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<LoggerError>,
    },
}

impl LoggerError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        LoggerError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for uartlog-rs operations
pub type Result<T> = std::result::Result<T, LoggerError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<LoggerError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
