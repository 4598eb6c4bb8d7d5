//! Environment handling for config values.
//!
//! Two mechanisms:
//! - `${VAR_NAME}` substitution inside string values (source URLs, headers),
//!   resolved at load time. Only `[A-Z_][A-Z0-9_]*` names match, and
//!   `$${VAR}` escapes to a literal `${VAR}`.
//! - `SIGNALFORGE_*` overrides applied to the typed config after parsing.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::schema::SignalForgeConfig;

pub const ENV_HEARTBEAT_HOUR: &str = "SIGNALFORGE_HEARTBEAT_HOUR";
pub const ENV_DATA_DIR: &str = "SIGNALFORGE_DATA_DIR";
pub const ENV_LOG_LEVEL: &str = "SIGNALFORGE_LOG_LEVEL";
pub const ENV_ANOMALY_THRESHOLD: &str = "SIGNALFORGE_ANOMALY_THRESHOLD";

/// `$${VAR}` (escaped) or `${VAR}`.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references from the process environment.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    resolve_env_vars_with(value, &std::env::vars().collect())
}

/// Substitute `${VAR}` references from `env`.
///
/// Walks the value tree; only string leaves change. An unset or empty
/// variable is an error naming the config path that referenced it.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                result.insert(k.clone(), substitute_value(v, env, &child)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &regex::Captures| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(substituted.into_owned())
}

/// Env var names referenced anywhere in a config value tree, sorted.
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => {
                for caps in ENV_VAR_PATTERN.captures_iter(s) {
                    if caps[1].is_empty() {
                        out.push(caps[2].to_string());
                    }
                }
            }
            Value::Array(arr) => arr.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }
    let mut vars = Vec::new();
    walk(value, &mut vars);
    vars.sort();
    vars.dedup();
    vars
}

/// Apply `SIGNALFORGE_*` overrides from the process environment.
pub fn apply_env_overrides(config: SignalForgeConfig) -> SignalForgeConfig {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

/// Apply `SIGNALFORGE_*` overrides from `env`. Unparsable values are
/// ignored with a warning.
pub fn apply_env_overrides_with(
    mut config: SignalForgeConfig,
    env: &HashMap<String, String>,
) -> SignalForgeConfig {
    let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    if let Some(raw) = get(ENV_HEARTBEAT_HOUR) {
        match raw.parse::<u8>() {
            Ok(hour) => config.heartbeat.hour_utc = hour,
            Err(e) => {
                warn!(var = ENV_HEARTBEAT_HOUR, value = raw, error = %e, "Ignoring env override")
            }
        }
    }
    if let Some(raw) = get(ENV_DATA_DIR) {
        config.paths.data_dir = Some(PathBuf::from(raw));
    }
    if let Some(raw) = get(ENV_LOG_LEVEL) {
        config.logging.level = Some(raw.to_string());
    }
    if let Some(raw) = get(ENV_ANOMALY_THRESHOLD) {
        match raw.parse::<f64>() {
            Ok(threshold) => config.anomaly.threshold = threshold,
            Err(e) => {
                warn!(var = ENV_ANOMALY_THRESHOLD, value = raw, error = %e, "Ignoring env override")
            }
        }
    }
    debug!("Applied environment overrides");
    config
}
