//! Test data builders for port documents

use serde_json::{json, Map, Value};

/// Builder for one entry of the `uart` array
#[derive(Debug, Clone)]
pub struct UartEntryBuilder {
    fields: Map<String, Value>,
}

impl Default for UartEntryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UartEntryBuilder {
    /// A valid 115200 8N1 entry on pins 17/16 without flow control
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert("tx_pin".into(), json!(17));
        fields.insert("rx_pin".into(), json!(16));
        fields.insert("cts_pin".into(), json!(-1));
        fields.insert("rts_pin".into(), json!(-1));
        fields.insert("baudRate".into(), json!(115200));
        fields.insert("stopBit".into(), json!(1.0));
        fields.insert("dataBit".into(), json!(8));
        fields.insert("parity".into(), json!("none"));
        fields.insert("flowCtrl".into(), json!("disable"));
        Self { fields }
    }

    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.fields.remove(key);
        self
    }

    pub fn pins(self, tx: i64, rx: i64, rts: i64, cts: i64) -> Self {
        self.set("tx_pin", json!(tx))
            .set("rx_pin", json!(rx))
            .set("rts_pin", json!(rts))
            .set("cts_pin", json!(cts))
    }

    pub fn baud(self, baud: i64) -> Self {
        self.set("baudRate", json!(baud))
    }

    pub fn stop_bits(self, stop_bits: f64) -> Self {
        self.set("stopBit", json!(stop_bits))
    }

    pub fn data_bits(self, data_bits: i64) -> Self {
        self.set("dataBit", json!(data_bits))
    }

    pub fn parity(self, parity: &str) -> Self {
        self.set("parity", json!(parity))
    }

    pub fn flow_control(self, flow: &str) -> Self {
        self.set("flowCtrl", json!(flow))
    }

    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Builder for a whole port document
#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    entries: Vec<Value>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: UartEntryBuilder) -> Self {
        self.entries.push(entry.build());
        self
    }

    pub fn raw_entry(mut self, entry: Value) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn build(self) -> Value {
        json!({ "uart": self.entries })
    }

    pub fn to_json(self) -> String {
        self.build().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder() {
        let entry = UartEntryBuilder::new()
            .baud(9600)
            .parity("odd")
            .remove("flowCtrl")
            .build();

        assert_eq!(entry["baudRate"], json!(9600));
        assert_eq!(entry["parity"], json!("odd"));
        assert!(entry.get("flowCtrl").is_none());
    }

    #[test]
    fn test_document_builder() {
        let doc = DocumentBuilder::new()
            .entry(UartEntryBuilder::new())
            .raw_entry(json!(null))
            .build();
        assert_eq!(doc["uart"].as_array().unwrap().len(), 2);
    }
}
