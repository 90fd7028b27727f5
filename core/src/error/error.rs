use thiserror::Error;

use super::persistence::CodecError;
use super::storage::StorageError;

/// Failures contained inside the store and delivered to the error handler.
///
/// None of these ever propagate out of a store operation: a failing
/// middleware or listener is reported and its siblings keep running.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("middleware '{name}' failed: {source}")]
    Middleware {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("listener failed: {0}")]
    Listener(#[source] anyhow::Error),
    #[error("listener for event '{event}' failed: {source}")]
    EventListener {
        event: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("key/value snapshot failed: {0}")]
    Storage(#[from] StorageError),
    #[error("state copy failed: {0}")]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// Short category label, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Middleware { .. } => "middleware",
            Self::Listener(_) => "listener",
            Self::EventListener { .. } => "event_listener",
            Self::Storage(_) => "storage",
            Self::Codec(_) => "codec",
        }
    }
}
