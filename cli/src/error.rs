use statevault_core::api::{CodecError, PersistenceError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    Usage(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    /// 11: config, 12: bad input, 13: missing key, 20: file I/O,
    /// 30: encoding or validation, 50: everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 11,
            Self::Usage(_) => 12,
            Self::KeyNotFound(_) => 13,
            Self::Persistence(pe) => match pe {
                PersistenceError::Io { .. }
                | PersistenceError::NotFound(_)
                | PersistenceError::NoBackup(_) => 20,
                PersistenceError::Validation(_) | PersistenceError::Codec(_) => 30,
            },
            Self::Codec(_) => 30,
            Self::Command(_) => 20,
            Self::Anyhow(_) => 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Config("x".into()).exit_code(), 11);
        assert_eq!(
            CliError::from(PersistenceError::NotFound(PathBuf::from("a.json"))).exit_code(),
            20
        );
        assert_eq!(
            CliError::from(CodecError::UnknownFormat("yaml".into())).exit_code(),
            30
        );
    }
}
