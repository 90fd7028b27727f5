#[allow(clippy::module_inception)]
pub mod error;
pub mod persistence;
pub mod storage;

pub use error::StoreError;
pub use persistence::{CodecError, PersistenceError};
pub use storage::StorageError;
