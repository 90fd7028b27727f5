use serde_json::Value;

use super::{StateCodec, FORMAT_TOML};
use crate::error::CodecError;

/// TOML encoding. TOML has no null: `null` table entries are dropped on
/// encode and `null` array elements fail to encode.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlCodec;

impl StateCodec for TomlCodec {
    fn format(&self) -> &'static str {
        FORMAT_TOML
    }

    fn encode(&self, value: &Value) -> Result<String, CodecError> {
        ::toml::to_string_pretty(value).map_err(|e| CodecError::serialize(FORMAT_TOML, e))
    }

    fn decode(&self, text: &str) -> Result<Value, CodecError> {
        ::toml::from_str::<Value>(text).map_err(|e| CodecError::deserialize(FORMAT_TOML, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_survives() {
        let value = json!({"count": 1, "name": "test", "nested": {"flag": true}});
        let text = TomlCodec.encode(&value).unwrap();
        assert_eq!(TomlCodec.decode(&text).unwrap(), value);
    }

    #[test]
    fn test_null_in_array_is_rejected() {
        let err = TomlCodec.encode(&json!({"list": [1, null]})).unwrap_err();
        assert!(matches!(err, CodecError::Serialize { format: "toml", .. }));
    }
}
