//! File-based persistence for state snapshots.
//!
//! [`PersistenceService`] owns one path. Every operation contains its own
//! failures: the sentinel API logs and returns `false`/`None`, the `try_*`
//! API returns a typed [`PersistenceError`](crate::error::PersistenceError).

pub mod middleware;
pub mod options;
pub mod service;

pub use middleware::PersistenceMiddleware;
pub use options::PersistenceOptions;
pub use service::{FileMetadata, PersistenceService, BACKUP_SUFFIX};
