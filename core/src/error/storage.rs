use thiserror::Error;

/// Failures of a key/value storage collaborator.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored snapshot is malformed: {0}")]
    Malformed(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}
