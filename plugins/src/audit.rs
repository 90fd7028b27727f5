//! Audit middleware: records which top-level keys each commit touches.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use statevault_core::api::{Middleware, State, StateValue};
use uuid::Uuid;

pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl KeyDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare two states key by key. Keys come out sorted.
pub fn diff_keys<V: PartialEq>(previous: &State<V>, next: &State<V>) -> KeyDiff {
    let mut diff = KeyDiff::default();
    for (key, value) in next {
        match previous.get(key) {
            None => diff.added.push(key.clone()),
            Some(old) if old != value => diff.changed.push(key.clone()),
            Some(_) => {}
        }
    }
    diff.removed = previous
        .keys()
        .filter(|k| !next.contains_key(*k))
        .cloned()
        .collect();
    diff
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub diff: KeyDiff,
}

/// Keeps the most recent `capacity` entries. Clones share the same log.
#[derive(Clone)]
pub struct AuditMiddleware {
    log: Arc<Mutex<VecDeque<AuditEntry>>>,
    capacity: usize,
}

impl Default for AuditMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditMiddleware {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn record(&self, diff: KeyDiff) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(AuditEntry {
            id: Uuid::new_v4(),
            at: Utc::now(),
            diff,
        });
    }
}

#[async_trait]
impl<V: StateValue + PartialEq> Middleware<V> for AuditMiddleware {
    fn name(&self) -> &str {
        "audit"
    }

    async fn handle(&self, previous: &State<V>, next: &State<V>) -> anyhow::Result<()> {
        let diff = diff_keys(previous, next);
        if diff.is_empty() {
            tracing::trace!(target: "statevault.audit", "commit without key changes");
            return Ok(());
        }
        tracing::info!(
            target: "statevault.audit",
            added = ?diff.added,
            removed = ?diff.removed,
            changed = ?diff.changed,
            "state change"
        );
        self.record(diff);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use statevault_core::api::{state_from_value, MiddlewareOptions, Store};

    fn state(value: Value) -> State {
        state_from_value(value).unwrap()
    }

    #[test]
    fn test_diff_keys() {
        let diff = diff_keys(
            &state(json!({"a": 1, "b": 2, "c": 3})),
            &state(json!({"a": 1, "b": 5, "d": 4})),
        );
        assert_eq!(
            diff,
            KeyDiff {
                added: vec!["d".into()],
                removed: vec!["c".into()],
                changed: vec!["b".into()],
            }
        );
    }

    #[tokio::test]
    async fn test_records_changes_and_skips_noops() {
        let audit = AuditMiddleware::new(2);
        let store: Store = Store::default();
        store.apply_middleware(audit.clone(), MiddlewareOptions::default());

        store.merge_state(state(json!({"a": 1}))).await;
        store.merge_state(state(json!({"a": 1}))).await;
        assert_eq!(audit.entries().len(), 1);

        store.merge_state(state(json!({"a": 2}))).await;
        store.merge_state(state(json!({"b": true}))).await;

        let entries = audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].diff.changed, ["a"]);
        assert_eq!(entries[1].diff.added, ["b"]);
    }

    #[tokio::test]
    async fn test_entries_serialize_flat() {
        let audit = AuditMiddleware::default();
        let store: Store = Store::default();
        store.apply_middleware(audit.clone(), MiddlewareOptions::default());
        store.merge_state(state(json!({"theme": "dark"}))).await;

        let entry = audit.entries().pop().unwrap();
        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(encoded["id"], json!(entry.id.to_string()));
        assert_eq!(encoded["added"], json!(["theme"]));
        assert_eq!(encoded["removed"], json!([]));
        assert!(encoded["at"].is_string());
    }
}
