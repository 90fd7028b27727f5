#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use statevault_core::api::{state_from_value, PersistenceService, State, Store};

pub fn state(value: Value) -> State {
    state_from_value(value).expect("test state must be a JSON object")
}

pub fn service_in(dir: &Path, name: &str) -> Arc<PersistenceService> {
    Arc::new(PersistenceService::new(dir.join(name)))
}

/// Route store errors into a shared list of error kinds.
pub fn capture_errors(store: &Store) -> Arc<Mutex<Vec<&'static str>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    store.set_error_handler(move |e| sink.lock().unwrap().push(e.kind()));
    errors
}
