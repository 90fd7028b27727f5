//! Observable state container.
//!
//! A [`Store`] owns a map of top-level keys to values. Mutations go through a
//! middleware pipeline, land in an undo/redo history and fan out to listeners.
//! Debounced and batched updates collapse several requests into one commit.

pub mod manager;
pub mod middleware;
pub mod notify;
pub mod scheduler;
pub mod snapshot;
pub mod types;

pub use manager::{ErrorHandler, Store, StoreBuilder};
pub use middleware::{
    async_middleware_fn, middleware_fn, AsyncFnMiddleware, FnMiddleware, Middleware, MiddlewareId,
    MiddlewareOptions,
};
pub use notify::{EventListener, Listener, Subscription};
pub use snapshot::{History, Snapshot};
pub use types::{deep_copy, merge, state_from_value, CommitOptions, State, StateValue};
