use std::path::PathBuf;

use clap::Parser;
use statevault_cli::commands::{cli, state};
use statevault_cli::error::CliError;
use statevault_core::api::{get_statevault_data_dir, load_default, load_from_path, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let mut cfg = match args.config.as_deref() {
        Some(path) => load_from_path(path),
        None => load_default(),
    }
    .map_err(|e| CliError::Config(e.to_string()))?;

    if let Some(format) = args.format.as_deref() {
        cfg.persistence.format = format.to_string();
    }
    if let Some(indent) = args.indent {
        cfg.persistence.indent = indent;
    }
    init_tracing(&cfg.logging).map_err(CliError::Config)?;
    tracing::debug!(
        file = %args.file.display(),
        format = %cfg.persistence.format,
        command = ?args.command,
        "statevault starting"
    );

    state::dispatch(args, cfg).await
}

const LOG_FILE_PREFIX: &str = "statevault.log";

/// Configured directory, else `<data dir>/logs`, else the system temp dir.
fn log_dir(logging: &LoggingConfig) -> PathBuf {
    if let Some(dir) = logging
        .directory
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return PathBuf::from(dir);
    }
    match get_statevault_data_dir() {
        Ok(data) => data.join("logs"),
        Err(_) => std::env::temp_dir().join("statevault").join("logs"),
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = log_dir(logging);
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("create log dir {} failed: {e}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_prefers_configured_directory() {
        let logging = LoggingConfig {
            directory: Some("  /var/log/statevault ".to_string()),
            ..LoggingConfig::default()
        };
        assert_eq!(log_dir(&logging), PathBuf::from("/var/log/statevault"));
    }

    #[test]
    fn test_log_dir_defaults_under_data_dir() {
        let logging = LoggingConfig {
            directory: Some("   ".to_string()),
            ..LoggingConfig::default()
        };
        let dir = log_dir(&logging);
        assert!(dir.ends_with("logs"));
        if let Ok(data) = get_statevault_data_dir() {
            assert_eq!(dir, data.join("logs"));
        }
    }
}
