//! State value model

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::CopyMode;
use crate::error::CodecError;

/// Top-level state: string keys to values, ordered by key.
pub type State<V = Value> = BTreeMap<String, V>;

/// Anything a store can hold as a top-level value.
pub trait StateValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StateValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Options of a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// Push the outgoing state onto the undo stack.
    pub add_to_history: bool,
    /// Coalesce with other debounced calls; only the last one commits.
    pub debounce: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            add_to_history: true,
            debounce: false,
        }
    }
}

impl CommitOptions {
    pub fn debounced() -> Self {
        Self {
            debounce: true,
            ..Self::default()
        }
    }

    pub fn without_history() -> Self {
        Self {
            add_to_history: false,
            ..Self::default()
        }
    }
}

/// Clone through a `serde_json` round trip, so the copy shares no handles
/// with the source.
pub fn deep_copy<V: StateValue>(state: &State<V>) -> Result<State<V>, CodecError> {
    let value = serde_json::to_value(state).map_err(|e| CodecError::serialize("json", e))?;
    serde_json::from_value(value).map_err(|e| CodecError::deserialize("json", e))
}

pub(crate) fn copy_with<V: StateValue>(
    mode: CopyMode,
    state: &State<V>,
) -> Result<State<V>, CodecError> {
    match mode {
        CopyMode::Deep => deep_copy(state),
        CopyMode::Shallow => Ok(state.clone()),
    }
}

/// Build a state from a JSON object.
pub fn state_from_value<V: StateValue>(value: Value) -> Result<State<V>, CodecError> {
    serde_json::from_value(value).map_err(|e| CodecError::deserialize("json", e))
}

/// Shallow merge: keys of `partial` replace same-named keys of `base`.
pub fn merge<V: Clone>(base: &State<V>, partial: State<V>) -> State<V> {
    let mut merged = base.clone();
    merged.extend(partial);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites_and_preserves() {
        let base: State = state_from_value(json!({"a": 1, "b": 2})).unwrap();
        let merged = merge(&base, state_from_value(json!({"k": "v"})).unwrap());
        assert_eq!(Value::from(serde_json::Map::from_iter(merged)), json!({"a": 1, "b": 2, "k": "v"}));

        let merged = merge(&base, state_from_value(json!({"a": 9})).unwrap());
        assert_eq!(merged["a"], json!(9));
        assert_eq!(merged["b"], json!(2));
    }

    #[test]
    fn test_state_from_non_object() {
        assert!(state_from_value::<Value>(json!([1, 2])).is_err());
    }
}
