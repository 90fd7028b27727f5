//! Middleware pipeline
//!
//! Entries live in an arena keyed by [`MiddlewareId`]. Ids grow
//! monotonically, so key order is insertion order and stays stable when
//! other entries are removed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{State, StateValue};

/// Interceptor invoked with (previous, next) before a mutation commits.
///
/// A middleware observes; it cannot veto or rewrite the candidate. An `Err`
/// is reported to the store's error handler and the pipeline moves on.
#[async_trait]
pub trait Middleware<V: StateValue = Value>: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, previous: &State<V>, next: &State<V>) -> anyhow::Result<()>;
}

/// Opaque handle returned by `Store::apply_middleware`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MiddlewareId(u64);

impl fmt::Display for MiddlewareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mw-{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareOptions {
    /// Name used in error reports; defaults to the middleware's own name.
    #[serde(default)]
    pub label: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MiddlewareOptions {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }
}

/// Synchronous middleware built from a closure.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

pub fn middleware_fn<V, F>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    V: StateValue,
    F: Fn(&State<V>, &State<V>) -> anyhow::Result<()> + Send + Sync,
{
    FnMiddleware {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<V, F> Middleware<V> for FnMiddleware<F>
where
    V: StateValue,
    F: Fn(&State<V>, &State<V>) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, previous: &State<V>, next: &State<V>) -> anyhow::Result<()> {
        (self.f)(previous, next)
    }
}

/// Asynchronous middleware built from a closure over owned copies.
pub struct AsyncFnMiddleware<F> {
    name: String,
    f: F,
}

pub fn async_middleware_fn<V, F>(name: impl Into<String>, f: F) -> AsyncFnMiddleware<F>
where
    V: StateValue,
    F: Fn(State<V>, State<V>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    AsyncFnMiddleware {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<V, F> Middleware<V> for AsyncFnMiddleware<F>
where
    V: StateValue,
    F: Fn(State<V>, State<V>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, previous: &State<V>, next: &State<V>) -> anyhow::Result<()> {
        (self.f)(previous.clone(), next.clone()).await
    }
}

struct MiddlewareEntry<V: StateValue> {
    middleware: Arc<dyn Middleware<V>>,
    enabled: bool,
    options: MiddlewareOptions,
}

pub(crate) struct MiddlewarePipeline<V: StateValue> {
    next_id: u64,
    entries: BTreeMap<MiddlewareId, MiddlewareEntry<V>>,
}

impl<V: StateValue> MiddlewarePipeline<V> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn push(
        &mut self,
        middleware: Arc<dyn Middleware<V>>,
        options: MiddlewareOptions,
    ) -> MiddlewareId {
        let id = MiddlewareId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            MiddlewareEntry {
                middleware,
                enabled: true,
                options,
            },
        );
        id
    }

    pub(crate) fn set_enabled(&mut self, id: MiddlewareId, enabled: bool) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_enabled(&self, id: MiddlewareId) -> Option<bool> {
        self.entries.get(&id).map(|e| e.enabled)
    }

    pub(crate) fn options(&self, id: MiddlewareId) -> Option<MiddlewareOptions> {
        self.entries.get(&id).map(|e| e.options.clone())
    }

    pub(crate) fn remove(&mut self, id: MiddlewareId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Enabled entries in invocation order, with their report names.
    pub(crate) fn chain(&self) -> Vec<(String, Arc<dyn Middleware<V>>)> {
        self.entries
            .values()
            .filter(|e| e.enabled)
            .map(|e| {
                let name = e
                    .options
                    .label
                    .clone()
                    .unwrap_or_else(|| e.middleware.name().to_string());
                (name, e.middleware.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Arc<dyn Middleware<Value>> {
        Arc::new(middleware_fn(name, |_: &State, _: &State| Ok(())))
    }

    #[test]
    fn test_chain_follows_insertion_and_toggles() {
        let mut pipeline = MiddlewarePipeline::new();
        let a = pipeline.push(noop("a"), MiddlewareOptions::default());
        let b = pipeline.push(noop("b"), MiddlewareOptions::labeled("bee"));
        let c = pipeline.push(noop("c"), MiddlewareOptions::default());

        let names: Vec<_> = pipeline.chain().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "bee", "c"]);

        assert!(pipeline.set_enabled(b, false));
        assert_eq!(pipeline.is_enabled(b), Some(false));
        let names: Vec<_> = pipeline.chain().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "c"]);

        assert!(pipeline.remove(a));
        assert!(!pipeline.remove(a));
        assert!(pipeline.set_enabled(c, true));
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.options(b), Some(MiddlewareOptions::labeled("bee")));
    }

    #[test]
    fn test_ids_stay_unique_after_clear() {
        let mut pipeline = MiddlewarePipeline::new();
        let first = pipeline.push(noop("a"), MiddlewareOptions::default());
        pipeline.clear();
        let second = pipeline.push(noop("a"), MiddlewareOptions::default());
        assert_ne!(first, second);
        assert!(!pipeline.set_enabled(first, false));
    }
}
