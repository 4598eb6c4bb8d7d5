//! Config file read/write with atomic backup rotation.

use crate::schema::SignalForgeConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Number of rolling backups to keep.
const MAX_BACKUPS: usize = 3;

pub const ENV_CONFIG_DIR: &str = "SIGNALFORGE_CONFIG_DIR";

/// Resolve the signalforge config directory.
/// Priority: `SIGNALFORGE_CONFIG_DIR` env > `~/.signalforge/`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    match dirs::home_dir() {
        Some(home) => home.join(".signalforge"),
        None => PathBuf::from(".signalforge"),
    }
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Read the raw YAML document as a JSON value tree.
///
/// Returns an empty object if the file doesn't exist (first run). An empty
/// file is treated the same way.
pub async fn load_config_value(path: &Path) -> Result<serde_json::Value> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(serde_json::Value::Object(Default::default()));
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }

    let value: serde_json::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;
    info!(path = %path.display(), "Loaded config");
    Ok(value)
}

/// Load and parse the typed config, without env substitution or defaults.
pub async fn load_config(path: &Path) -> Result<SignalForgeConfig> {
    let value = load_config_value(path).await?;
    serde_json::from_value(value)
        .with_context(|| format!("Config at {} does not match the schema", path.display()))
}

/// Write config to disk atomically (write to temp file, rename).
///
/// Creates a rolling backup of the previous config before overwriting.
pub async fn write_config(config: &SignalForgeConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    if fs::try_exists(path).await.unwrap_or(false) {
        rotate_backups(path).await;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "Wrote config");
    Ok(())
}

/// Rotate backup files: config.yaml.bak.1 → .bak.2 → ... → .bak.N
async fn rotate_backups(path: &Path) {
    for i in (1..MAX_BACKUPS).rev() {
        let old = path.with_extension(format!("yaml.bak.{i}"));
        let new = path.with_extension(format!("yaml.bak.{}", i + 1));
        if fs::try_exists(&old).await.unwrap_or(false) {
            if let Err(e) = fs::rename(&old, &new).await {
                warn!("Failed to rotate backup {}: {}", old.display(), e);
            }
        }
    }

    let bak = path.with_extension("yaml.bak.1");
    if let Err(e) = fs::copy(path, &bak).await {
        warn!("Failed to create backup {}: {}", bak.display(), e);
    }
}
