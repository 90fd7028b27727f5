use std::path::PathBuf;

use thiserror::Error;

/// Serialization failures of a state codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{format} serialization failed: {message}")]
    Serialize {
        format: &'static str,
        message: String,
    },
    #[error("{format} deserialization failed: {message}")]
    Deserialize {
        format: &'static str,
        message: String,
    },
    #[error("unknown state format: {0}")]
    UnknownFormat(String),
}

impl CodecError {
    pub fn serialize(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Serialize {
            format,
            message: err.to_string(),
        }
    }

    pub fn deserialize(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Deserialize {
            format,
            message: err.to_string(),
        }
    }
}

/// Typed failures of the persistence service.
///
/// The sentinel API (`save_state`, `load_state`, ...) logs these and returns
/// `false`/`None`; the `try_*` variants hand them to the caller.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no state file at {}", .0.display())]
    NotFound(PathBuf),
    #[error("no backup file at {}", .0.display())]
    NoBackup(PathBuf),
    #[error("state failed round-trip validation: {0}")]
    Validation(#[source] CodecError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl PersistenceError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound && op == "read" {
            return Self::NotFound(path);
        }
        Self::Io { op, path, source }
    }
}
