use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use statevault_core::api::{
    AppConfig, MiddlewareOptions, PersistenceError, PersistenceMiddleware, PersistenceService,
    State, Store,
};
use statevault_plugins::audit::{AuditMiddleware, KeyDiff};
use statevault_plugins::factory;

use super::cli::{Args, Commands};
use crate::error::CliError;

pub async fn dispatch(args: Args, cfg: AppConfig) -> Result<i32, CliError> {
    let service = factory::build_persistence(&cfg, &args.file);
    match args.command {
        Commands::Show => {
            let state = load_or_empty(&service).await?;
            println!("{}", service.encode(&state)?);
        }
        Commands::Get { key } => {
            let value = get_value(&service, &key).await?;
            println!("{}", serde_json::to_string_pretty(&value).map_err(anyhow::Error::from)?);
        }
        Commands::Set(set) => {
            let mut partial = State::new();
            partial.insert(set.key, parse_value(&set.value));
            let diff = commit(&cfg, service, partial).await?;
            print_diff(&diff);
        }
        Commands::Merge { json } => {
            let diff = commit(&cfg, service, parse_object(&json)?).await?;
            print_diff(&diff);
        }
        Commands::Validate => {
            let state: State = service.try_load_state().await?;
            if !service.validate_state(&state) {
                println!("invalid: {}", service.path().display());
                return Ok(1);
            }
            println!("valid: {} ({} keys)", service.path().display(), state.len());
        }
        Commands::Backup => {
            let state = load_or_empty(&service).await?;
            service.try_backup_state(&state).await?;
            println!("backed up to {}", service.backup_path().display());
        }
        Commands::Restore => {
            let state: State = service.try_restore_from_backup().await?;
            println!("restored {} keys from {}", state.len(), service.backup_path().display());
        }
        Commands::Info => print_info(&service).await?,
        Commands::Truncate => {
            if !service.truncate().await {
                return Err(CliError::Command(format!(
                    "cannot truncate {}",
                    service.path().display()
                )));
            }
        }
        Commands::Delete => {
            if !service.delete().await {
                return Err(CliError::Command(format!(
                    "cannot delete {}",
                    service.path().display()
                )));
            }
        }
    }
    Ok(0)
}

/// JSON when it parses, otherwise the raw text as a string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn parse_object(raw: &str) -> Result<State, CliError> {
    serde_json::from_str(raw).map_err(|e| CliError::Usage(format!("expected a JSON object: {e}")))
}

/// The saved state, or an empty one when the file does not exist yet.
pub async fn load_or_empty(service: &PersistenceService) -> Result<State, CliError> {
    match service.try_load_state().await {
        Ok(state) => Ok(state),
        Err(PersistenceError::NotFound(path)) => {
            tracing::debug!(path = %path.display(), "starting from empty state");
            Ok(State::new())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_value(service: &PersistenceService, key: &str) -> Result<Value, CliError> {
    let mut state = load_or_empty(service).await?;
    state
        .remove(key)
        .ok_or_else(|| CliError::KeyNotFound(key.to_string()))
}

/// Merge `partial` into the saved state through a store whose pipeline
/// writes the file. Returns the keys the commit touched.
pub async fn commit(
    cfg: &AppConfig,
    service: Arc<PersistenceService>,
    partial: State,
) -> Result<KeyDiff, CliError> {
    let current = load_or_empty(&service).await?;
    let store: Store = Store::with_config(current, cfg.store.clone());

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    store.set_error_handler(move |e| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(e.to_string())
    });

    let audit = AuditMiddleware::default();
    store.apply_middleware(audit.clone(), MiddlewareOptions::labeled("audit"));
    store.apply_middleware(
        PersistenceMiddleware::new(service),
        MiddlewareOptions::labeled("persistence"),
    );
    store.merge_state(partial).await;

    let failures = failures
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .join("; ");
    if !failures.is_empty() {
        return Err(CliError::Command(failures));
    }
    Ok(audit
        .entries()
        .pop()
        .map(|entry| entry.diff)
        .unwrap_or_default())
}

fn print_diff(diff: &KeyDiff) {
    if diff.is_empty() {
        println!("no changes");
        return;
    }
    for (label, keys) in [
        ("added", &diff.added),
        ("changed", &diff.changed),
        ("removed", &diff.removed),
    ] {
        if !keys.is_empty() {
            println!("{label}: {}", keys.join(", "));
        }
    }
}

async fn print_info(service: &PersistenceService) -> Result<(), CliError> {
    let options = service.options();
    println!("path:     {}", service.path().display());
    println!("format:   {} (indent {})", options.format, options.indent);
    println!("version:  {}", options.version);

    match service.metadata().await {
        Some(meta) => {
            println!("size:     {} bytes", meta.size);
            if let Some(modified) = meta.modified {
                println!("modified: {}", modified.to_rfc3339());
            }
            if let Some(created) = meta.created {
                println!("created:  {}", created.to_rfc3339());
            }
            println!("readonly: {}", meta.readonly);
        }
        None => println!("size:     (missing)"),
    }

    let has_backup = tokio::fs::try_exists(service.backup_path())
        .await
        .unwrap_or(false);
    println!("backup:   {}", if has_backup { "yes" } else { "no" });
    Ok(())
}
