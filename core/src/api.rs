//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `statevault_core::api` instead of reaching into internal modules.

pub use crate::codec::{codec_for, JsonCodec, StateCodec, TomlCodec, FORMAT_JSON, FORMAT_TOML};
pub use crate::config::{
    get_statevault_data_dir, load_default, load_from_path, AppConfig, CopyMode, LoggingConfig,
    StorageConfig, StorageKind, StoreConfig,
};
pub use crate::error::{CodecError, PersistenceError, StorageError, StoreError};
pub use crate::persistence::{
    FileMetadata, PersistenceMiddleware, PersistenceOptions, PersistenceService, BACKUP_SUFFIX,
};
pub use crate::storage::{KvStorage, MemoryStorage, NoopStorage};
pub use crate::store::{
    async_middleware_fn, deep_copy, merge, middleware_fn, state_from_value, CommitOptions,
    ErrorHandler, EventListener, Listener, Middleware, MiddlewareId, MiddlewareOptions, State,
    StateValue, Store, StoreBuilder, Subscription,
};
