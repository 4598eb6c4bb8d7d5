//! Config validation: semantic checks with user-friendly error messages.

use std::collections::HashSet;

use crate::schema::{SignalForgeConfig, SourceKind};
use thiserror::Error;

/// Longest cache TTL accepted: one hundred years.
const MAX_TTL_HOURS: f64 = 24.0 * 365.0 * 100.0;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError { path: path.into(), message: message.into() });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError { path: path.into(), message: message.into() });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &SignalForgeConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_heartbeat(config, &mut report);
    validate_retry(config, &mut report);
    validate_thresholds(config, &mut report);
    validate_sources(config, &mut report);
    report
}

fn validate_heartbeat(config: &SignalForgeConfig, report: &mut ValidationReport) {
    if config.heartbeat.hour_utc > 23 {
        report.error(
            "heartbeat.hourUtc",
            format!("Hour {} is out of range; use 0-23 (UTC)", config.heartbeat.hour_utc),
        );
    }
}

fn validate_retry(config: &SignalForgeConfig, report: &mut ValidationReport) {
    let retry = &config.retry;
    if retry.max_attempts == 0 {
        report.error("retry.maxAttempts", "maxAttempts must be >= 1");
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        report.error(
            "retry.baseDelayMs",
            format!(
                "baseDelayMs ({}) exceeds maxDelayMs ({})",
                retry.base_delay_ms, retry.max_delay_ms
            ),
        );
    }
}

fn validate_thresholds(config: &SignalForgeConfig, report: &mut ValidationReport) {
    let threshold = config.anomaly.threshold;
    if !(threshold.is_finite() && threshold > 0.0) {
        report.error("anomaly.threshold", "threshold must be a positive number");
    }
    let ttl = config.cache.ttl_hours;
    if let Some(message) = ttl_problem(ttl) {
        report.error("cache.ttlHours", message);
    } else if ttl == 0.0 {
        report.warn("cache.ttlHours", "ttlHours is 0; every cycle will refetch");
    }
}

fn ttl_problem(ttl: f64) -> Option<String> {
    if !ttl.is_finite() || ttl < 0.0 {
        Some("ttlHours must be a number >= 0".to_string())
    } else if ttl > MAX_TTL_HOURS {
        Some(format!("ttlHours {ttl} exceeds the maximum of {MAX_TTL_HOURS}"))
    } else {
        None
    }
}

fn validate_sources(config: &SignalForgeConfig, report: &mut ValidationReport) {
    if config.sources.is_empty() {
        report.warn("sources", "No sources configured; cycles will fail");
    }

    let mut seen = HashSet::new();
    for (i, source) in config.sources.iter().enumerate() {
        let path = format!("sources[{i}]");
        let name = source.name.trim();
        if name.is_empty() {
            report.error(format!("{path}.name"), "Source name cannot be empty");
        } else if !seen.insert(name) {
            report.error(format!("{path}.name"), format!("Duplicate source name '{name}'"));
        }

        match source.kind {
            SourceKind::Http => {
                let url = source.url.as_deref().unwrap_or("").trim();
                if url.is_empty() {
                    report.error(format!("{path}.url"), "http sources require a url");
                } else if !(url.starts_with("http://") || url.starts_with("https://")) {
                    report.error(
                        format!("{path}.url"),
                        format!("Unsupported url scheme in '{url}'"),
                    );
                }
            }
            SourceKind::File => {
                if source.path.is_none() {
                    report.error(format!("{path}.path"), "file sources require a path");
                }
            }
        }

        if let Some(message) = source.ttl_hours.and_then(ttl_problem) {
            report.error(format!("{path}.ttlHours"), message);
        }
        if source.timeout_secs == Some(0) {
            report.error(format!("{path}.timeoutSecs"), "timeoutSecs must be >= 1");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SourceConfig;
    use std::path::PathBuf;

    fn source(name: &str, kind: SourceKind) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            kind,
            url: None,
            path: None,
            ttl_hours: None,
            timeout_secs: None,
            headers: Default::default(),
        }
    }

    #[test]
    fn default_config_only_warns() {
        let report = validate(&SignalForgeConfig::default());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn out_of_range_values_are_errors() {
        let mut cfg = SignalForgeConfig::default();
        cfg.heartbeat.hour_utc = 24;
        cfg.retry.max_attempts = 0;
        cfg.retry.base_delay_ms = 20_000;
        cfg.anomaly.threshold = 0.0;
        let report = validate(&cfg);
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["heartbeat.hourUtc", "retry.maxAttempts", "retry.baseDelayMs", "anomaly.threshold"]
        );
    }

    #[test]
    fn unusable_ttls_are_errors() {
        let mut cfg = SignalForgeConfig::default();
        cfg.cache.ttl_hours = 3.0e9;
        let mut nan_ttl = source("dex", SourceKind::File);
        nan_ttl.path = Some(PathBuf::from("/srv/dex.json"));
        nan_ttl.ttl_hours = Some(f64::NAN);
        let mut negative_ttl = source("gh", SourceKind::File);
        negative_ttl.path = Some(PathBuf::from("/srv/gh.json"));
        negative_ttl.ttl_hours = Some(-1.0);
        let mut long_ttl = source("chain", SourceKind::File);
        long_ttl.path = Some(PathBuf::from("/srv/chain.json"));
        long_ttl.ttl_hours = Some(24.0 * 365.0 * 10.0);
        cfg.sources = vec![nan_ttl, negative_ttl, long_ttl];

        let report = validate(&cfg);
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["cache.ttlHours", "sources[0].ttlHours", "sources[1].ttlHours"]);
    }

    #[test]
    fn source_requirements() {
        let mut cfg = SignalForgeConfig::default();
        let mut good_file = source("onchain", SourceKind::File);
        good_file.path = Some(PathBuf::from("/srv/onchain.json"));
        let mut bad_scheme = source("gh", SourceKind::Http);
        bad_scheme.url = Some("ftp://x".into());
        cfg.sources = vec![
            good_file,
            source("onchain", SourceKind::Http),
            source(" ", SourceKind::File),
            bad_scheme,
        ];

        let report = validate(&cfg);
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "sources[1].name",
                "sources[1].url",
                "sources[2].name",
                "sources[2].path",
                "sources[3].url"
            ]
        );
    }
}
