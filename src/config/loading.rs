//! Locating and reading the configuration file.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};

use super::Config;
use super::validation::validate_config;
use crate::constants::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};

/// Explicit configuration file, set once at startup from `--config`.
static CONFIG_PATH: OnceCell<PathBuf> = OnceCell::new();

/// Use `path` instead of the default location for the rest of the process.
pub fn set_config_path(path: impl Into<PathBuf>) -> Result<()> {
    CONFIG_PATH
        .set(path.into())
        .map_err(|_| anyhow::anyhow!("Configuration path already set"))
}

/// The explicit path if one was set, otherwise `$XDG_CONFIG_HOME/shd/shd.toml`.
pub fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH.get() {
        return Ok(path.clone());
    }
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn load() -> Result<Config> {
    let path = get_config_path()?;
    load_from_path(&path)
}

/// Read, parse and validate the file at `path`.
pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("Configuration file not found at {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    validate_config(&config).with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}
