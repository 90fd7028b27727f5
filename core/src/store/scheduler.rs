//! Batching and debouncing of mutations

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;

use super::types::State;

/// Partial updates collected between `start_batch_update` and
/// `end_batch_update`.
#[derive(Debug)]
pub(crate) struct BatchQueue<V> {
    active: bool,
    queue: Vec<State<V>>,
}

impl<V> BatchQueue<V> {
    pub(crate) fn new() -> Self {
        Self {
            active: false,
            queue: Vec::new(),
        }
    }

    /// Open a fresh batch, discarding anything queued by an unclosed one.
    pub(crate) fn start(&mut self) {
        self.active = true;
        self.queue.clear();
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Queue `partial` if a batch is open; otherwise hand it back so the
    /// caller can commit it directly.
    pub(crate) fn push(&mut self, partial: State<V>) -> Option<State<V>> {
        if self.active {
            self.queue.push(partial);
            None
        } else {
            Some(partial)
        }
    }

    /// Close the batch and fold the queue left to right; later keys win.
    pub(crate) fn finish(&mut self) -> Option<State<V>> {
        self.active = false;
        let mut queued = std::mem::take(&mut self.queue).into_iter();
        let mut merged = queued.next()?;
        for partial in queued {
            merged.extend(partial);
        }
        Some(merged)
    }
}

/// Keeps only the latest scheduled commit alive.
///
/// Every schedule or cancel bumps a generation counter; a timer that wakes up
/// under a newer generation does nothing.
#[derive(Debug, Default)]
pub(crate) struct Debouncer {
    generation: AtomicU64,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Supersede whatever is scheduled. Returns whether a timer was pending.
    pub(crate) fn cancel(&self) -> bool {
        let was_pending = self.has_pending();
        self.next_generation();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        was_pending
    }
}
