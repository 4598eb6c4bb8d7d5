//! signalforge runtime configuration schema.
//!
//! Typed for serde YAML/JSON with camelCase keys. Every section may be
//! omitted; paths left unset are derived from `paths.dataDir` by
//! [`crate::defaults::apply_all_defaults`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_HEARTBEAT_HOUR: u8 = 6;
pub const DEFAULT_CACHE_TTL_HOURS: f64 = 6.0;
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalForgeConfig {
    pub heartbeat: HeartbeatSection,
    pub paths: PathsConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub anomaly: AnomalyConfig,
    pub logging: LoggingConfig,
    /// Signal sources, fetched in order each cycle.
    pub sources: Vec<SourceConfig>,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSection {
    /// Hour of day (UTC) at which the daily cycle fires.
    pub hour_utc: u8,
    /// Run one cycle as soon as the scheduler starts.
    pub run_on_start: bool,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self { hour_utc: DEFAULT_HEARTBEAT_HOUR, run_on_start: false }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Paths with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPaths {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub lock_file: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Cache / retry / anomaly / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// TTL for sources that do not set their own.
    pub ttl_hours: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_hours: DEFAULT_CACHE_TTL_HOURS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 1_000, max_delay_ms: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnomalyConfig {
    /// Minimum |z| for a value to be reported.
    pub threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self { threshold: DEFAULT_ANOMALY_THRESHOLD }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Level filter, e.g. `"info"` or `"signalforge=debug"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// JSON `SignalSet` snapshot on local disk.
    File,
    /// JSON `SignalSet` served over HTTP GET.
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Overrides `cache.ttlHours` for this source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Extra request headers for `http` sources; values support `${VAR}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl SignalForgeConfig {
    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn ttl_hours_for(&self, source: &SourceConfig) -> f64 {
        source.ttl_hours.unwrap_or(self.cache.ttl_hours)
    }
}
