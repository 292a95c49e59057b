//! Configuration module for uartlog-rs
//!
//! This module handles the two configuration layers of the logger:
//! - The port document (`config.json` on the storage volume) describing the
//!   electrical and protocol settings of every UART
//! - The logger settings file (`uartlog.toml`) that maps document entries to
//!   devices and tunes the pipelines
//!
//! # Port Document
//!
//! ```json
//! {
//!   "uart": [
//!     { "tx_pin": 43, "rx_pin": 44, "cts_pin": -1, "rts_pin": -1,
//!       "baudRate": 115200, "stopBit": 1.0, "dataBit": 8,
//!       "parity": "none", "flowCtrl": "disable" }
//!   ]
//! }
//! ```
//!
//! Documents are loaded into an owned [`ConfigDocument`] that lives for the
//! scope doing load + resolve and is dropped afterwards. Reloading simply
//! loads a fresh document.
//!
//! # Example
//!
//! ```ignore
//! use uartlog_rs::config::{load_document, resolver};
//!
//! let document = load_document("/sdcard/config.json")?;
//! let port1 = resolver::resolve(&document, 1)?;
//! ```

pub mod resolver;
pub mod settings;

pub use resolver::{resolve, resolve_value};
pub use settings::*;

use crate::error::LoadError;
use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Documents of this size or larger are rejected before parsing
pub const MAX_CONFIG_SIZE: u64 = 131_072;

/// Default location of the port document
pub const DEFAULT_CONFIG_PATH: &str = "/sdcard/config.json";

/// A parsed port document
///
/// The resolver only borrows the tree and never keeps references past a call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Value,
}

impl ConfigDocument {
    /// Wrap an already parsed JSON tree
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// The root of the JSON tree
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Number of entries in the `uart` array, if it is an array
    pub fn port_count(&self) -> Option<usize> {
        self.root
            .get(resolver::UART_KEY)
            .and_then(Value::as_array)
            .map(Vec::len)
    }
}

/// Read an entire file, enforcing [`MAX_CONFIG_SIZE`]
pub fn read_whole_file(path: impl AsRef<Path>) -> Result<Vec<u8>, LoadError> {
    let path = path.as_ref();
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let size = file.metadata().map_err(io_err)?.len();
    if size >= MAX_CONFIG_SIZE {
        return Err(LoadError::TooLarge {
            size,
            max: MAX_CONFIG_SIZE,
        });
    }

    // The file may grow between stat and read, so cap the read as well
    let mut bytes = Vec::with_capacity(size as usize);
    file.take(MAX_CONFIG_SIZE)
        .read_to_end(&mut bytes)
        .map_err(io_err)?;

    if bytes.len() as u64 >= MAX_CONFIG_SIZE {
        return Err(LoadError::TooLarge {
            size: bytes.len() as u64,
            max: MAX_CONFIG_SIZE,
        });
    }
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }

    Ok(bytes)
}

/// Parse a JSON document
pub fn parse_json(bytes: &[u8]) -> Result<ConfigDocument, LoadError> {
    let root = serde_json::from_slice(bytes)?;
    Ok(ConfigDocument { root })
}

/// Read and parse the port document at `path`
pub fn load_document(path: impl AsRef<Path>) -> Result<ConfigDocument, LoadError> {
    let path = path.as_ref();
    let bytes = read_whole_file(path)?;
    let document = parse_json(&bytes)?;
    tracing::debug!(
        "Loaded port document {:?} ({} bytes, {:?} uart entries)",
        path,
        bytes.len(),
        document.port_count()
    );
    Ok(document)
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_document() {
        let file = write_temp(br#"{"uart":[{"baudRate":9600}, {}]}"#);
        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc.port_count(), Some(2));
    }

    #[test]
    fn test_missing_file() {
        let err = load_document("/definitely/not/here/config.json").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_empty_file() {
        let file = write_temp(b"");
        assert!(matches!(read_whole_file(file.path()), Err(LoadError::Empty)));
    }

    #[test]
    fn test_size_limit_is_exclusive() {
        let file = write_temp(&vec![b' '; MAX_CONFIG_SIZE as usize]);
        let err = read_whole_file(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::TooLarge { size, .. } if size == MAX_CONFIG_SIZE));

        let file = write_temp(&vec![b' '; MAX_CONFIG_SIZE as usize - 1]);
        assert!(read_whole_file(file.path()).is_ok());
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_json(b"{\"uart\": [").unwrap_err();
        assert!(matches!(err, LoadError::Parse(_)));
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_port_count_without_array() {
        let doc = parse_json(br#"{"uart": 5}"#).unwrap();
        assert_eq!(doc.port_count(), None);
    }

    #[test]
    fn test_reload_reads_fresh_content() {
        let mut file = write_temp(br#"{"uart":[{}]}"#);
        assert_eq!(load_document(file.path()).unwrap().port_count(), Some(1));

        file.as_file_mut().set_len(0).unwrap();
        std::fs::write(file.path(), br#"{"uart":[{},{},{}]}"#).unwrap();
        assert_eq!(load_document(file.path()).unwrap().port_count(), Some(3));
    }
}
