//! `signalforge-config`: runtime configuration management.
//!
//! Provides:
//! - Typed config schema (heartbeat, paths, cache, retry, anomaly, sources)
//! - YAML read/write with atomic backup rotation
//! - `${ENV_VAR}` substitution and `SIGNALFORGE_*` overrides
//! - Default path derivation
//! - Semantic validation
//! - Credential redaction for display

pub mod defaults;
pub mod env;
pub mod io;
pub mod redact;
pub mod schema;
pub mod validation;

pub use defaults::{apply_all_defaults, expand_home};
pub use env::{
    apply_env_overrides, apply_env_overrides_with, collect_referenced_vars, resolve_env_vars,
    resolve_env_vars_with, MissingEnvVarError,
};
pub use io::{config_dir, config_file_path, load_config, load_config_value, write_config};
pub use redact::{redact_config, redact_url};
pub use schema::{
    AnomalyConfig, CacheConfig, HeartbeatSection, LoggingConfig, PathsConfig, ResolvedPaths,
    RetryConfig, SignalForgeConfig, SourceConfig, SourceKind, DEFAULT_HTTP_TIMEOUT_SECS,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Load, substitute env vars, apply overrides and defaults, then validate.
///
/// This is the main entry point for loading a config at runtime. Validation
/// warnings are logged; any validation error fails the load.
pub async fn load_and_prepare(path: &Path) -> Result<SignalForgeConfig> {
    let value = load_config_value(path).await?;
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;
    let config: SignalForgeConfig = serde_json::from_value(value)
        .with_context(|| format!("Config at {} does not match the schema", path.display()))?;

    let fallback_data_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let config = apply_all_defaults(apply_env_overrides(config), fallback_data_dir);
    check(&validate(&config))?;
    Ok(config)
}

fn check(report: &ValidationReport) -> Result<()> {
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if !report.is_valid() {
        let details: Vec<String> =
            report.errors.iter().map(|e| format!("{}: {}", e.path, e.message)).collect();
        bail!("Invalid configuration ({} error(s)): {}", report.errors.len(), details.join("; "));
    }
    Ok(())
}
