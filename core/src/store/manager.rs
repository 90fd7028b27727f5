//! State container

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;

use super::middleware::{Middleware, MiddlewareId, MiddlewareOptions, MiddlewarePipeline};
use super::notify::{self, Registry, Subscription};
use super::scheduler::{BatchQueue, Debouncer};
use super::snapshot::History;
use super::types::{copy_with, merge, CommitOptions, State, StateValue};
use crate::config::{CopyMode, StoreConfig};
use crate::error::{CodecError, StorageError, StoreError};
use crate::storage::{KvStorage, NoopStorage};

/// Receives every contained failure of a store.
pub type ErrorHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Timeline<V> {
    current: State<V>,
    /// Pre-commit state of the latest commit.
    previous: State<V>,
    history: History<V>,
}

enum Update<V> {
    Replace(State<V>),
    Merge(State<V>),
}

struct StoreInner<V: StateValue> {
    initial: State<V>,
    timeline: Mutex<Timeline<V>>,
    copy_mode: RwLock<CopyMode>,
    debounce_delay: Duration,
    key_events: bool,
    storage_key: String,
    storage: Arc<dyn KvStorage>,
    error_handler: RwLock<Option<ErrorHandler>>,
    pipeline: Mutex<MiddlewarePipeline<V>>,
    registry: Arc<Mutex<Registry<V>>>,
    batch: Mutex<BatchQueue<V>>,
    debouncer: Debouncer,
    /// Single-flight commits: one mutation (or undo/redo) at a time.
    commit_lock: tokio::sync::Mutex<()>,
}

/// Observable state container.
///
/// Cloning a `Store` is cheap and yields another handle to the same state.
/// Every mutation runs the middleware pipeline, records history, swaps the
/// state, notifies listeners and writes a snapshot to the key/value storage.
/// Middleware must not await a mutation of the same store: commits are
/// serialized and such a call would wait on itself.
#[derive(Clone)]
pub struct Store<V: StateValue = Value> {
    inner: Arc<StoreInner<V>>,
}

pub struct StoreBuilder<V: StateValue = Value> {
    initial: State<V>,
    config: StoreConfig,
    storage: Arc<dyn KvStorage>,
    error_handler: Option<ErrorHandler>,
}

impl<V: StateValue> Default for StoreBuilder<V> {
    fn default() -> Self {
        Self {
            initial: State::new(),
            config: StoreConfig::default(),
            storage: Arc::new(NoopStorage),
            error_handler: None,
        }
    }
}

impl<V: StateValue> StoreBuilder<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial(mut self, initial: State<V>) -> Self {
        self.initial = initial;
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn copy_mode(mut self, mode: CopyMode) -> Self {
        self.config.copy_mode = mode;
        self
    }

    pub fn debounce(mut self, delay: Duration) -> Self {
        self.config.debounce_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn storage(self, storage: impl KvStorage + 'static) -> Self {
        self.shared_storage(Arc::new(storage))
    }

    pub fn shared_storage(mut self, storage: Arc<dyn KvStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Store<V> {
        let inner = StoreInner {
            timeline: Mutex::new(Timeline {
                current: self.initial.clone(),
                previous: self.initial.clone(),
                history: History::new(),
            }),
            initial: self.initial,
            copy_mode: RwLock::new(self.config.copy_mode),
            debounce_delay: self.config.debounce_delay(),
            key_events: self.config.key_events,
            storage_key: self.config.storage_key,
            storage: self.storage,
            error_handler: RwLock::new(self.error_handler),
            pipeline: Mutex::new(MiddlewarePipeline::new()),
            registry: Arc::new(Mutex::new(Registry::new())),
            batch: Mutex::new(BatchQueue::new()),
            debouncer: Debouncer::default(),
            commit_lock: tokio::sync::Mutex::new(()),
        };

        let store = Store {
            inner: Arc::new(inner),
        };
        store.adopt_stored_state();
        store
    }
}

impl<V: StateValue> Default for Store<V> {
    fn default() -> Self {
        Self::new(State::new())
    }
}

impl<V: StateValue> Store<V> {
    pub fn new(initial: State<V>) -> Self {
        StoreBuilder::new().initial(initial).build()
    }

    pub fn with_config(initial: State<V>, config: StoreConfig) -> Self {
        StoreBuilder::new().initial(initial).config(config).build()
    }

    pub fn builder() -> StoreBuilder<V> {
        StoreBuilder::new()
    }

    /// Take over a snapshot left in the key/value storage by a previous run.
    fn adopt_stored_state(&self) {
        let key = &self.inner.storage_key;
        let text = match self.inner.storage.get(key) {
            Ok(Some(text)) => text,
            Ok(None) => return,
            Err(e) => {
                self.report(StoreError::Storage(e));
                return;
            }
        };

        match serde_json::from_str::<State<V>>(&text) {
            Ok(saved) => {
                let mut timeline = lock(&self.inner.timeline);
                timeline.current = saved.clone();
                timeline.previous = saved;
                tracing::debug!(key = %key, "adopted stored state");
            }
            Err(e) => self.report(StoreError::Storage(StorageError::Malformed(e.to_string()))),
        }
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        *self
            .inner
            .error_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn clear_error_handler(&self) {
        *self
            .inner
            .error_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn report(&self, error: StoreError) {
        let handler = self
            .inner
            .error_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(&error),
            None => tracing::error!(kind = error.kind(), error = %error, "store error"),
        }
    }

    pub fn copy_mode(&self) -> CopyMode {
        *self
            .inner
            .copy_mode
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the copy mode. Snapshots already in the history keep whatever
    /// sharing they were stored with.
    pub fn set_copy_mode(&self, mode: CopyMode) {
        *self
            .inner
            .copy_mode
            .write()
            .unwrap_or_else(PoisonError::into_inner) = mode;
    }

    fn copy(&self, state: &State<V>) -> State<V> {
        match copy_with(self.copy_mode(), state) {
            Ok(copy) => copy,
            Err(e) => {
                self.report(StoreError::Codec(e));
                state.clone()
            }
        }
    }

    fn read_copy(&self, pick: impl FnOnce(&Timeline<V>) -> &State<V>) -> State<V> {
        let mode = self.copy_mode();
        let timeline = lock(&self.inner.timeline);
        let source = pick(&*timeline);
        match copy_with(mode, source) {
            Ok(copy) => copy,
            Err(e) => {
                let fallback = source.clone();
                drop(timeline);
                self.report(StoreError::Codec(e));
                fallback
            }
        }
    }

    /// Copy of the current state, per the active copy mode.
    pub fn get_state(&self) -> State<V> {
        self.read_copy(|t| &t.current)
    }

    /// Copy of a single top-level value.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_state().remove(key)
    }

    /// The pre-commit state of the most recent commit.
    pub fn previous_state(&self) -> State<V> {
        self.read_copy(|t| &t.previous)
    }

    /// The state this store was constructed with.
    pub fn initial_state(&self) -> State<V> {
        self.copy(&self.inner.initial)
    }

    /// Replace the state, recording history.
    pub async fn set_state(&self, state: State<V>) {
        self.set_state_with(state, CommitOptions::default()).await
    }

    pub async fn set_state_with(&self, state: State<V>, options: CommitOptions) {
        if options.debounce {
            self.schedule(state, options.add_to_history);
        } else {
            self.commit(Update::Replace(state), options.add_to_history)
                .await;
        }
    }

    /// Shallow-merge `partial` over the current top-level keys and commit.
    pub async fn merge_state(&self, partial: State<V>) {
        self.commit(Update::Merge(partial), true).await
    }

    /// Same as [`Store::merge_state`].
    pub async fn patch_state(&self, partial: State<V>) {
        self.merge_state(partial).await
    }

    /// Commit the construction-time state without touching the history.
    pub async fn reset_state(&self) {
        let initial = self.inner.initial.clone();
        self.commit(Update::Replace(initial), false).await
    }

    fn schedule(&self, state: State<V>, add_to_history: bool) {
        let generation = self.inner.debouncer.next_generation();
        let delay = self.inner.debounce_delay;
        let store = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if store.inner.debouncer.is_current(generation) {
                store.commit(Update::Replace(state), add_to_history).await;
            } else {
                tracing::trace!(generation, "debounced update superseded");
            }
        });
        self.inner.debouncer.track(handle);
    }

    /// True while a debounced update waits for its delay.
    pub fn has_pending_update(&self) -> bool {
        self.inner.debouncer.has_pending()
    }

    /// Drop the pending debounced update, if any.
    pub fn cancel_pending_update(&self) -> bool {
        self.inner.debouncer.cancel()
    }

    async fn commit(&self, update: Update<V>, add_to_history: bool) {
        let _guard = self.inner.commit_lock.lock().await;

        let previous = self.get_state();
        let candidate = match update {
            Update::Replace(state) => state,
            Update::Merge(partial) => merge(&previous, partial),
        };
        let candidate = match self.copy_mode() {
            CopyMode::Deep => self.copy(&candidate),
            CopyMode::Shallow => candidate,
        };

        self.run_middleware(&previous, &candidate).await;

        let outgoing = std::mem::replace(&mut lock(&self.inner.timeline).current, candidate);
        let snapshot = add_to_history.then(|| self.copy(&outgoing));
        {
            let mut timeline = lock(&self.inner.timeline);
            if let Some(snapshot) = snapshot {
                timeline.history.record(snapshot);
            }
            timeline.previous = outgoing;
        }
        tracing::debug!(add_to_history, "state committed");

        self.notify();
        self.write_snapshot();
    }

    async fn run_middleware(&self, previous: &State<V>, next: &State<V>) {
        let chain = lock(&self.inner.pipeline).chain();
        for (name, middleware) in chain {
            if let Err(source) = middleware.handle(previous, next).await {
                self.report(StoreError::Middleware { name, source });
            }
        }
    }

    fn write_snapshot(&self) {
        let encoded = serde_json::to_string(&lock(&self.inner.timeline).current);
        let result = match encoded {
            Ok(text) => self
                .inner
                .storage
                .set(&self.inner.storage_key, &text)
                .map_err(StoreError::Storage),
            Err(e) => Err(StoreError::Codec(CodecError::serialize("json", e))),
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    pub fn start_batch_update(&self) {
        lock(&self.inner.batch).start();
    }

    /// Queue `partial` into the open batch, or merge it right away when no
    /// batch is open.
    pub async fn queue_batch_update(&self, partial: State<V>) {
        let unbatched = lock(&self.inner.batch).push(partial);
        if let Some(partial) = unbatched {
            self.merge_state(partial).await;
        }
    }

    /// Close the batch and commit everything it queued as one merge.
    pub async fn end_batch_update(&self) {
        let merged = lock(&self.inner.batch).finish();
        if let Some(merged) = merged {
            self.commit(Update::Merge(merged), true).await;
        }
    }

    pub fn is_batching(&self) -> bool {
        lock(&self.inner.batch).is_active()
    }

    pub fn apply_middleware<M>(&self, middleware: M, options: MiddlewareOptions) -> MiddlewareId
    where
        M: Middleware<V> + 'static,
    {
        self.apply_shared_middleware(Arc::new(middleware), options)
    }

    pub fn apply_shared_middleware(
        &self,
        middleware: Arc<dyn Middleware<V>>,
        options: MiddlewareOptions,
    ) -> MiddlewareId {
        lock(&self.inner.pipeline).push(middleware, options)
    }

    pub fn enable_middleware(&self, id: MiddlewareId) -> bool {
        lock(&self.inner.pipeline).set_enabled(id, true)
    }

    pub fn disable_middleware(&self, id: MiddlewareId) -> bool {
        lock(&self.inner.pipeline).set_enabled(id, false)
    }

    pub fn remove_middleware(&self, id: MiddlewareId) -> bool {
        lock(&self.inner.pipeline).remove(id)
    }

    pub fn remove_all_middlewares(&self) {
        lock(&self.inner.pipeline).clear();
    }

    pub fn is_middleware_enabled(&self, id: MiddlewareId) -> Option<bool> {
        lock(&self.inner.pipeline).is_enabled(id)
    }

    pub fn middleware_options(&self, id: MiddlewareId) -> Option<MiddlewareOptions> {
        lock(&self.inner.pipeline).options(id)
    }

    pub fn middleware_count(&self) -> usize {
        lock(&self.inner.pipeline).len()
    }

    /// Step back one commit. Listeners run; middleware does not.
    pub async fn undo(&self) -> bool {
        let _guard = self.inner.commit_lock.lock().await;
        let moved = {
            let mut guard = lock(&self.inner.timeline);
            let timeline = &mut *guard;
            match timeline.history.undo(&timeline.current) {
                Some(restored) => {
                    timeline.current = restored;
                    true
                }
                None => false,
            }
        };
        if moved {
            tracing::debug!("undo");
            self.notify();
        }
        moved
    }

    /// Step forward again after an undo.
    pub async fn redo(&self) -> bool {
        let _guard = self.inner.commit_lock.lock().await;
        let moved = {
            let mut guard = lock(&self.inner.timeline);
            let timeline = &mut *guard;
            match timeline.history.redo(&timeline.current) {
                Some(restored) => {
                    timeline.current = restored;
                    true
                }
                None => false,
            }
        };
        if moved {
            tracing::debug!("redo");
            self.notify();
        }
        moved
    }

    pub fn clear_history(&self) {
        lock(&self.inner.timeline).history.clear();
    }

    pub fn undo_stack_size(&self) -> usize {
        lock(&self.inner.timeline).history.undo_len()
    }

    pub fn redo_stack_size(&self) -> usize {
        lock(&self.inner.timeline).history.redo_len()
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack_size() > 0
    }

    pub fn can_redo(&self) -> bool {
        self.redo_stack_size() > 0
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&State<V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = lock(&self.inner.registry).add_listener(Arc::new(listener));
        notify::detach_listener(&self.inner.registry, id)
    }

    /// Listen to a named event. Besides explicit [`Store::trigger_event`]
    /// calls, the listener fires after every commit whose state has a
    /// top-level key of the same name (unless `key_events` is off).
    pub fn on<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&V) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = lock(&self.inner.registry).add_event_listener(event, Arc::new(listener));
        notify::detach_event_listener(&self.inner.registry, event.to_string(), id)
    }

    pub fn trigger_event(&self, event: &str, payload: &V) {
        let listeners = lock(&self.inner.registry).event_listeners(event);
        for listener in listeners {
            if let Err(source) = listener(payload) {
                self.report(StoreError::EventListener {
                    event: event.to_string(),
                    source,
                });
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.registry).listener_count()
    }

    pub fn event_listener_count(&self, event: &str) -> usize {
        lock(&self.inner.registry).event_listener_count(event)
    }

    fn notify(&self) {
        let listeners = lock(&self.inner.registry).listeners();
        for listener in listeners {
            let state = self.get_state();
            if let Err(e) = listener(&state) {
                self.report(StoreError::Listener(e));
            }
        }

        if !self.inner.key_events {
            return;
        }
        let state = self.get_state();
        let keyed = lock(&self.inner.registry).keyed_events(&state);
        for (event, listeners) in keyed {
            let Some(value) = state.get(&event) else {
                continue;
            };
            for listener in listeners {
                if let Err(source) = listener(value) {
                    self.report(StoreError::EventListener {
                        event: event.clone(),
                        source,
                    });
                }
            }
        }
    }
}

impl<V: StateValue> fmt::Debug for Store<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("copy_mode", &self.copy_mode())
            .field("undo", &self.undo_stack_size())
            .field("redo", &self.redo_stack_size())
            .field("listeners", &self.listener_count())
            .field("middlewares", &self.middleware_count())
            .finish()
    }
}
