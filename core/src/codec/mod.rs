//! Text encodings for persisted state.
//!
//! Codecs work on `serde_json::Value`; typed state is converted to and from
//! a `Value` by the persistence service before it reaches a codec.

pub mod json;
pub mod toml_codec;

use serde_json::Value;

use crate::error::CodecError;

pub use json::JsonCodec;
pub use toml_codec::TomlCodec;

pub const FORMAT_JSON: &str = "json";
pub const FORMAT_TOML: &str = "toml";

pub trait StateCodec: Send + Sync {
    /// Format tag, as stored in `PersistenceOptions::format`.
    fn format(&self) -> &'static str;
    fn encode(&self, value: &Value) -> Result<String, CodecError>;
    fn decode(&self, text: &str) -> Result<Value, CodecError>;
}

/// Resolve a codec from a format tag. Tags are case-insensitive.
pub fn codec_for(format: &str, indent: usize) -> Result<Box<dyn StateCodec>, CodecError> {
    match format.trim().to_ascii_lowercase().as_str() {
        FORMAT_JSON => Ok(Box::new(JsonCodec::new(indent))),
        FORMAT_TOML => Ok(Box::new(TomlCodec)),
        other => Err(CodecError::UnknownFormat(other.to_string())),
    }
}
