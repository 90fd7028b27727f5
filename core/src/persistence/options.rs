use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::FORMAT_JSON;

/// Options bag of the persistence service.
///
/// Unknown keys are kept in `extra`, so callers can carry their own settings
/// alongside the built-in ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceOptions {
    /// Indentation width of the encoded file; 0 writes compact output.
    #[serde(default = "default_indent")]
    pub indent: usize,

    /// Format tag, see [`crate::codec::codec_for`].
    #[serde(default = "default_format")]
    pub format: String,

    /// Schema version, left to caller convention.
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_indent() -> usize {
    2
}

fn default_format() -> String {
    FORMAT_JSON.to_string()
}

fn default_version() -> u32 {
    1
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            indent: default_indent(),
            format: default_format(),
            version: default_version(),
            extra: Map::new(),
        }
    }
}
