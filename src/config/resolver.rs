//! Port configuration resolver
//!
//! Turns one element of the document's `uart` array into a [`PortConfig`].
//! Resolution is a pure function over a borrowed JSON tree: it performs no
//! I/O, touches no shared state and does not log. Callers log the returned
//! [`ConfigError`].
//!
//! # Field rules
//!
//! | Field | Read as | Rule |
//! |-------|---------|------|
//! | `tx_pin`, `rx_pin`, `cts_pin`, `rts_pin` | integer | outside `0..=MAX_PIN` → not connected |
//! | `baudRate` | integer | taken as-is; outside `u32` reads as 0 |
//! | `stopBit` | float | exactly 1, 1.5 or 2, else [`ConfigError::InvalidStopBits`] |
//! | `dataBit` | integer | 5..=8, else [`ConfigError::InvalidDataBits`] |
//! | `parity` | string | contains `odd` → Odd, contains `even` → Even, else None |
//! | `flowCtrl` | string | contains `rts` → RTS, contains `cts` → CTS, contains `rtscts` → RTS+CTS, else disabled |
//!
//! Absent numeric fields read as zero. The flow-control branches are tested
//! in the order listed, so a value containing `rts` always resolves to RTS.

use crate::error::ConfigError;
use crate::types::{DataBits, FlowControl, Parity, PinId, PortConfig, StopBits};
use serde_json::{Map, Value};

use super::ConfigDocument;

/// Key of the top-level port array
pub const UART_KEY: &str = "uart";

/// Resolve the configuration of `port_index` from a loaded document
pub fn resolve(document: &ConfigDocument, port_index: usize) -> Result<PortConfig, ConfigError> {
    resolve_value(document.root(), port_index)
}

/// Resolve the configuration of `port_index` from a raw JSON tree
pub fn resolve_value(root: &Value, port_index: usize) -> Result<PortConfig, ConfigError> {
    let ports = root
        .get(UART_KEY)
        .and_then(Value::as_array)
        .ok_or(ConfigError::NotAnArray)?;

    if ports.is_empty() {
        return Err(ConfigError::EmptyArray);
    }

    let entry = ports
        .get(port_index)
        .and_then(Value::as_object)
        .ok_or(ConfigError::MissingPortEntry(port_index))?;

    let tx = PinId::from_raw(read_int(entry, "tx_pin"));
    let rx = PinId::from_raw(read_int(entry, "rx_pin"));
    let cts = PinId::from_raw(read_int(entry, "cts_pin"));
    let rts = PinId::from_raw(read_int(entry, "rts_pin"));

    // Out of range values become 0 rather than failing resolution
    let baud_rate = u32::try_from(read_int(entry, "baudRate")).unwrap_or(0);

    let stop_value = read_float(entry, "stopBit");
    let stop_bits =
        StopBits::from_value(stop_value).ok_or(ConfigError::InvalidStopBits(stop_value))?;

    let data_value = read_int(entry, "dataBit");
    let data_bits =
        DataBits::from_value(data_value).ok_or(ConfigError::InvalidDataBits(data_value))?;

    Ok(PortConfig {
        tx,
        rx,
        rts,
        cts,
        baud_rate,
        stop_bits,
        data_bits,
        parity: parse_parity(read_str(entry, "parity")),
        flow_control: parse_flow_control(read_str(entry, "flowCtrl")),
    })
}

/// Substring match on the `parity` field
pub fn parse_parity(value: Option<&str>) -> Parity {
    match value {
        Some(s) if s.contains("odd") => Parity::Odd,
        Some(s) if s.contains("even") => Parity::Even,
        _ => Parity::None,
    }
}

/// Substring match on the `flowCtrl` field, first matching branch wins
pub fn parse_flow_control(value: Option<&str>) -> FlowControl {
    match value {
        Some(s) if s.contains("rts") => FlowControl::Rts,
        Some(s) if s.contains("cts") => FlowControl::Cts,
        Some(s) if s.contains("rtscts") => FlowControl::RtsCts,
        _ => FlowControl::Disabled,
    }
}

fn read_int(entry: &Map<String, Value>, key: &str) -> i64 {
    match entry.get(key) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        None => 0,
    }
}

fn read_float(entry: &Map<String, Value>, key: &str) -> f64 {
    entry.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn read_str<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}
