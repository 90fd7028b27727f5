use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::persistence::PersistenceOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub persistence: PersistenceOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a daily file under `directory` (or `~/.statevault/logs` if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "statevault_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// How state is cloned on every read and every commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    /// Full serialize/deserialize round trip: the copy shares nothing.
    #[default]
    Deep,
    /// Top-level clone only: shared handles inside values stay aliased.
    Shallow,
}

impl std::str::FromStr for CopyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deep" => Ok(Self::Deep),
            "shallow" => Ok(Self::Shallow),
            other => Err(format!("unknown copy mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub copy_mode: CopyMode,

    /// Delay before a debounced update commits.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Key under which the key/value storage keeps the state snapshot.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Fire event listeners whose name matches a top-level state key after
    /// every commit.
    #[serde(default = "default_key_events")]
    pub key_events: bool,
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_storage_key() -> String {
    "app_state".to_string()
}

fn default_key_events() -> bool {
    true
}

impl StoreConfig {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            copy_mode: CopyMode::default(),
            debounce_ms: default_debounce_ms(),
            storage_key: default_storage_key(),
            key_events: default_key_events(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    None,
    Memory,
    File,
}

/// Key/value storage used for automatic state snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,

    /// Directory for `file` storage. If unset, uses `<data dir>/kv`.
    #[serde(default)]
    pub directory: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.store.copy_mode, CopyMode::Deep);
        assert_eq!(cfg.store.debounce_delay(), Duration::from_millis(200));
        assert_eq!(cfg.store.storage_key, "app_state");
        assert!(cfg.store.key_events);
        assert_eq!(cfg.storage.kind, StorageKind::None);
        assert_eq!(cfg.persistence.indent, 2);
        assert_eq!(cfg.persistence.format, "json");
        assert_eq!(cfg.persistence.version, 1);
    }

    #[test]
    fn test_partial_toml() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [store]
            copy_mode = "shallow"
            debounce_ms = 50

            [storage]
            kind = "file"
            directory = "/tmp/kv"

            [persistence]
            indent = 4
            schema = "v2"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.store.copy_mode, CopyMode::Shallow);
        assert_eq!(cfg.store.debounce_ms, 50);
        assert_eq!(cfg.storage.kind, StorageKind::File);
        assert_eq!(cfg.persistence.indent, 4);
        assert_eq!(cfg.persistence.extra["schema"], "v2");
    }

    #[test]
    fn test_copy_mode_from_str() {
        assert_eq!("Shallow".parse::<CopyMode>().unwrap(), CopyMode::Shallow);
        assert!("sideways".parse::<CopyMode>().is_err());
    }
}
