use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use super::{StateCodec, FORMAT_JSON};
use crate::error::CodecError;

/// JSON encoding. An indent of 0 produces compact single-line output.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    indent: usize,
}

impl JsonCodec {
    pub fn new(indent: usize) -> Self {
        Self { indent }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(2)
    }
}

impl StateCodec for JsonCodec {
    fn format(&self) -> &'static str {
        FORMAT_JSON
    }

    fn encode(&self, value: &Value) -> Result<String, CodecError> {
        if self.indent == 0 {
            return serde_json::to_string(value).map_err(|e| CodecError::serialize(FORMAT_JSON, e));
        }

        let indent = " ".repeat(self.indent);
        let mut buf = Vec::with_capacity(128);
        let formatter = PrettyFormatter::with_indent(indent.as_bytes());
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value
            .serialize(&mut ser)
            .map_err(|e| CodecError::serialize(FORMAT_JSON, e))?;
        String::from_utf8(buf).map_err(|e| CodecError::serialize(FORMAT_JSON, e))
    }

    fn decode(&self, text: &str) -> Result<Value, CodecError> {
        serde_json::from_str(text).map_err(|e| CodecError::deserialize(FORMAT_JSON, e))
    }
}
