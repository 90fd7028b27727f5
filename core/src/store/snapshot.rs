//! Snapshots and the undo/redo history

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::State;

/// A stored copy of the state at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot<V> {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub state: State<V>,
}

impl<V> Snapshot<V> {
    pub fn new(state: State<V>) -> Self {
        Self {
            id: Uuid::new_v4(),
            taken_at: Utc::now(),
            state,
        }
    }
}

/// Two unbounded LIFO stacks of snapshots.
#[derive(Debug)]
pub struct History<V> {
    undo: Vec<Snapshot<V>>,
    redo: Vec<Snapshot<V>>,
}

impl<V> Default for History<V> {
    fn default() -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
        }
    }
}

impl<V: Clone> History<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outgoing state of a forward mutation. Any forward mutation
    /// invalidates the redo stack.
    pub fn record(&mut self, outgoing: State<V>) {
        self.undo.push(Snapshot::new(outgoing));
        self.redo.clear();
    }

    /// Pop the latest undo snapshot, parking `current` on the redo stack.
    pub fn undo(&mut self, current: &State<V>) -> Option<State<V>> {
        let snapshot = self.undo.pop()?;
        self.redo.push(Snapshot::new(current.clone()));
        Some(snapshot.state)
    }

    /// Mirror of [`History::undo`].
    pub fn redo(&mut self, current: &State<V>) -> Option<State<V>> {
        let snapshot = self.redo.pop()?;
        self.undo.push(Snapshot::new(current.clone()));
        Some(snapshot.state)
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Most recent undo snapshot, if any.
    pub fn last(&self) -> Option<&Snapshot<V>> {
        self.undo.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(n: i64) -> State<i64> {
        State::from([("n".to_string(), n)])
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut history = History::new();
        history.record(state(0));
        history.record(state(1));

        let current = state(2);
        let back = history.undo(&current).unwrap();
        assert_eq!(back, state(1));
        assert_eq!(history.redo_len(), 1);

        let forward = history.redo(&back).unwrap();
        assert_eq!(forward, state(2));
        assert_eq!(history.undo_len(), 2);
        assert_eq!(history.redo_len(), 0);
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = History::new();
        history.record(state(0));
        history.undo(&state(1)).unwrap();
        assert_eq!(history.redo_len(), 1);

        history.record(state(0));
        assert_eq!(history.redo_len(), 0);
    }

    #[test]
    fn test_empty_stacks() {
        let mut history: History<i64> = History::new();
        assert!(history.undo(&state(0)).is_none());
        assert!(history.redo(&state(0)).is_none());
        assert!(history.last().is_none());
        assert_eq!(history.redo_len(), 0);
    }
}
