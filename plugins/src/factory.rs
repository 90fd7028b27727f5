use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use statevault_core::api::{
    get_statevault_data_dir, AppConfig, KvStorage, MemoryStorage, NoopStorage, PersistenceService,
    State, StorageConfig, StorageKind, Store,
};

use crate::storage::FileKvStorage;

pub fn build_storage(cfg: &StorageConfig) -> Result<Arc<dyn KvStorage>> {
    match cfg.kind {
        StorageKind::None => Ok(Arc::new(NoopStorage)),
        StorageKind::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageKind::File => {
            let dir = match cfg.directory.as_deref().map(str::trim) {
                Some(d) if !d.is_empty() => PathBuf::from(d),
                _ => get_statevault_data_dir()?.join("kv"),
            };
            Ok(Arc::new(FileKvStorage::new(dir)))
        }
    }
}

pub fn build_store(cfg: &AppConfig, initial: State) -> Result<Store> {
    let storage = build_storage(&cfg.storage)?;
    Ok(Store::builder()
        .initial(initial)
        .config(cfg.store.clone())
        .shared_storage(storage)
        .build())
}

pub fn build_persistence(cfg: &AppConfig, path: impl Into<PathBuf>) -> Arc<PersistenceService> {
    Arc::new(PersistenceService::with_options(
        path,
        cfg.persistence.clone(),
    ))
}
