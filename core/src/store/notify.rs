//! Listener and event registries

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::types::State;

/// Receives the full state after every commit, undo and redo.
pub type Listener<V> = Arc<dyn Fn(&State<V>) -> anyhow::Result<()> + Send + Sync>;

/// Receives the payload of a named event.
pub type EventListener<V> = Arc<dyn Fn(&V) -> anyhow::Result<()> + Send + Sync>;

pub(crate) struct Registry<V> {
    next_id: u64,
    listeners: Vec<(u64, Listener<V>)>,
    events: BTreeMap<String, Vec<(u64, EventListener<V>)>>,
}

impl<V> Registry<V> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
            events: BTreeMap::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn add_listener(&mut self, listener: Listener<V>) -> u64 {
        let id = self.next_id();
        self.listeners.push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(i, _)| *i != id);
        before != self.listeners.len()
    }

    pub(crate) fn add_event_listener(&mut self, event: &str, listener: EventListener<V>) -> u64 {
        let id = self.next_id();
        self.events
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    pub(crate) fn remove_event_listener(&mut self, event: &str, id: u64) -> bool {
        let Some(list) = self.events.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(i, _)| *i != id);
        let removed = before != list.len();
        if list.is_empty() {
            self.events.remove(event);
        }
        removed
    }

    pub(crate) fn listeners(&self) -> Vec<Listener<V>> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }

    pub(crate) fn event_listeners(&self, event: &str) -> Vec<EventListener<V>> {
        self.events
            .get(event)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    /// Registered events whose name is a key of `state`, with their listeners.
    pub(crate) fn keyed_events(&self, state: &State<V>) -> Vec<(String, Vec<EventListener<V>>)> {
        self.events
            .iter()
            .filter(|(name, _)| state.contains_key(*name))
            .map(|(name, list)| (name.clone(), list.iter().map(|(_, l)| l.clone()).collect()))
            .collect()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn event_listener_count(&self, event: &str) -> usize {
        self.events.get(event).map_or(0, Vec::len)
    }
}

pub(crate) fn detach_listener<V: Send + 'static>(
    registry: &Arc<Mutex<Registry<V>>>,
    id: u64,
) -> Subscription {
    let registry: Weak<Mutex<Registry<V>>> = Arc::downgrade(registry);
    Subscription::new(move || {
        if let Some(registry) = registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove_listener(id);
        }
    })
}

pub(crate) fn detach_event_listener<V: Send + 'static>(
    registry: &Arc<Mutex<Registry<V>>>,
    event: String,
    id: u64,
) -> Subscription {
    let registry: Weak<Mutex<Registry<V>>> = Arc::downgrade(registry);
    Subscription::new(move || {
        if let Some(registry) = registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove_event_listener(&event, id);
        }
    })
}

/// Detach capability returned by `Store::subscribe` and `Store::on`.
///
/// Dropping a subscription keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it. Unsubscribing twice is a no-op.
pub struct Subscription {
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    pub fn unsubscribe(&self) {
        let detach = self
            .detach
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(detach) = detach {
            detach();
        }
    }

    pub fn is_active(&self) -> bool {
        self.detach
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
