//! Walk through the store lifecycle: middleware, listeners, batching,
//! undo/redo and file persistence.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use statevault_core::api::{
    middleware_fn, state_from_value, MiddlewareOptions, PersistenceMiddleware,
    PersistenceService, State, Store,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let store: Store = Store::new(state_from_value(json!({"count": 0, "user": null}))?);

    let path = std::env::temp_dir().join("statevault-demo.json");
    let service = Arc::new(PersistenceService::new(&path));
    store.apply_middleware(
        PersistenceMiddleware::new(service.clone()),
        MiddlewareOptions::labeled("disk"),
    );
    store.apply_middleware(
        middleware_fn("changes", |previous: &State, next: &State| {
            let changed = next
                .iter()
                .filter(|(k, v)| previous.get(*k) != Some(*v))
                .count();
            println!("middleware: {changed} key(s) changing");
            Ok(())
        }),
        MiddlewareOptions::default(),
    );

    let sub = store.subscribe(|state| {
        println!("listener: {}", serde_json::to_string(state)?);
        Ok(())
    });
    store.on("count", |count| {
        println!("count is now {count}");
        Ok(())
    });

    store.merge_state(state_from_value(json!({"count": 1}))?).await;

    store.start_batch_update();
    store
        .queue_batch_update(state_from_value(json!({"count": 2}))?)
        .await;
    store
        .queue_batch_update(state_from_value(json!({"user": "ada"}))?)
        .await;
    store.end_batch_update().await;

    store.undo().await;
    println!("after undo: {:?}", store.get("count"));
    store.redo().await;
    println!("after redo: {:?}", store.get("count"));

    sub.unsubscribe();
    if let Some(saved) = service.load_state::<State>().await {
        println!("on disk at {}: {}", path.display(), serde_json::to_string(&saved)?);
    }
    service.delete().await;

    Ok(())
}
