use std::path::{Path, PathBuf};

use super::types::{AppConfig, CopyMode};

/// Get the default statevault data directory: ~/.statevault
pub fn get_statevault_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".statevault"))
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)?;
    let mut cfg = toml::from_str::<AppConfig>(&s)?;
    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.statevault/config.toml
    let data_dir = get_statevault_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./statevault.toml (current directory)
    let local_config = Path::new("statevault.toml");

    let mut cfg: AppConfig = if user_config.exists() {
        let s = std::fs::read_to_string(&user_config)?;
        toml::from_str::<AppConfig>(&s)?
    } else if local_config.exists() {
        let s = std::fs::read_to_string(local_config)?;
        toml::from_str::<AppConfig>(&s)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

// Environment variable overrides (Priority 0: highest)
fn apply_env_overrides(cfg: &mut AppConfig) -> anyhow::Result<()> {
    if let Ok(v) = std::env::var("STATEVAULT_LOG") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }
    if let Ok(v) = std::env::var("STATEVAULT_COPY_MODE") {
        if !v.trim().is_empty() {
            cfg.store.copy_mode = v.parse::<CopyMode>().map_err(anyhow::Error::msg)?;
        }
    }
    if let Ok(v) = std::env::var("STATEVAULT_DEBOUNCE_MS") {
        if !v.trim().is_empty() {
            cfg.store.debounce_ms = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid STATEVAULT_DEBOUNCE_MS: {e}"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("statevault.toml");
        std::fs::write(&path, "[store]\nstorage_key = \"session\"\n").unwrap();

        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.store.storage_key, "session");
    }

    #[test]
    fn test_load_from_path_rejects_bad_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("statevault.toml");
        std::fs::write(&path, "[store\n").unwrap();

        assert!(load_from_path(&path).is_err());
    }
}
