//! Persisted run state.
//!
//! Loading is advisory: any failure yields default state plus the reason.
//! Saving is not: a failed write is returned to the caller, since the
//! counters would otherwise drift from what actually ran.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunState {
    pub last_run_time: Option<DateTime<Utc>>,
    /// `YYYY-MM-DD` of the last executed cycle, empty before the first one.
    pub last_run_date: String,
    pub consecutive_failures: u32,
    pub cycle_count: u64,
    pub total_reports: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RunState {
    fn stamp(&mut self, now: DateTime<Utc>) {
        self.last_run_time = Some(now);
        self.last_run_date = now.format("%Y-%m-%d").to_string();
        self.cycle_count += 1;
    }

    pub fn record_success(&mut self, now: DateTime<Utc>, produced_report: bool) {
        self.stamp(now);
        self.consecutive_failures = 0;
        if produced_report {
            self.total_reports += 1;
        }
        self.last_outcome = Some("ok".to_string());
        self.last_error = None;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>, error: &str) {
        self.stamp(now);
        self.consecutive_failures += 1;
        self.last_outcome = Some("error".to_string());
        self.last_error = Some(error.to_string());
    }
}

/// Why default state was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultReason {
    Missing,
    Unreadable(String),
    Unparsable(String),
}

impl fmt::Display for DefaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultReason::Missing => write!(f, "state file missing"),
            DefaultReason::Unreadable(e) => write!(f, "state file unreadable: {e}"),
            DefaultReason::Unparsable(e) => write!(f, "state file unparsable: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateLoad {
    Loaded(RunState),
    Defaulted { state: RunState, reason: DefaultReason },
}

impl StateLoad {
    pub fn state(&self) -> &RunState {
        match self {
            StateLoad::Loaded(state) | StateLoad::Defaulted { state, .. } => state,
        }
    }

    pub fn into_state(self) -> RunState {
        match self {
            StateLoad::Loaded(state) | StateLoad::Defaulted { state, .. } => state,
        }
    }

    pub fn default_reason(&self) -> Option<&DefaultReason> {
        match self {
            StateLoad::Loaded(_) => None,
            StateLoad::Defaulted { reason, .. } => Some(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to serialize run state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write run state to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read run state, falling back to defaults on any failure.
///
/// Fields absent from the file take their default values.
pub async fn load_state(path: &Path) -> StateLoad {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No run state yet; using defaults");
            return StateLoad::Defaulted {
                state: RunState::default(),
                reason: DefaultReason::Missing,
            };
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Run state unreadable; using defaults");
            return StateLoad::Defaulted {
                state: RunState::default(),
                reason: DefaultReason::Unreadable(e.to_string()),
            };
        }
    };

    match serde_json::from_str::<RunState>(&raw) {
        Ok(state) => StateLoad::Loaded(state),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Run state unparsable; using defaults");
            StateLoad::Defaulted {
                state: RunState::default(),
                reason: DefaultReason::Unparsable(e.to_string()),
            }
        }
    }
}

/// Atomically replace the state file: write a pid-named temp sibling, then rename.
pub async fn save_state(state: &RunState, path: &Path) -> Result<(), StateError> {
    let json = serde_json::to_vec_pretty(state)?;
    let tmp_path = temp_sibling(path);
    let write_err = |source| StateError::Write { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let result = match fs::write(&tmp_path, &json).await {
        Ok(()) => fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }

    debug!(path = %path.display(), cycle_count = state.cycle_count, "Saved run state");
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!("{name}.{}.tmp", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut state = RunState::default();
        state.record_success(Utc.with_ymd_and_hms(2024, 7, 1, 6, 0, 0).unwrap(), true);
        state.record_failure(Utc.with_ymd_and_hms(2024, 7, 2, 6, 0, 1).unwrap(), "upstream 502");

        save_state(&state, &path).await.unwrap();
        let loaded = load_state(&path).await;
        assert_eq!(loaded, StateLoad::Loaded(state));
    }

    #[tokio::test]
    async fn missing_file_defaults_with_reason() {
        let dir = TempDir::new().unwrap();
        let loaded = load_state(&dir.path().join("absent.json")).await;
        assert_eq!(loaded.default_reason(), Some(&DefaultReason::Missing));
        assert_eq!(loaded.into_state(), RunState::default());
    }

    #[tokio::test]
    async fn garbage_defaults_as_unparsable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ cycleCount: ").unwrap();
        let loaded = load_state(&path).await;
        assert!(matches!(loaded.default_reason(), Some(DefaultReason::Unparsable(_))));
        assert_eq!(loaded.state(), &RunState::default());
    }

    #[tokio::test]
    async fn partial_file_merges_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{ "cycleCount": 9, "totalReports": 4 }"#).unwrap();
        let state = load_state(&path).await.into_state();
        assert_eq!(state.cycle_count, 9);
        assert_eq!(state.total_reports, 4);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_run_time.is_none());
    }

    #[tokio::test]
    async fn save_failure_is_surfaced_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        // Target is an existing directory, so the rename cannot succeed.
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();

        let err = save_state(&RunState::default(), &path).await.unwrap_err();
        assert!(matches!(err, StateError::Write { .. }));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn counters_follow_outcomes() {
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 6, 0, 0).unwrap();
        let mut state = RunState::default();
        state.record_failure(now, "boom");
        state.record_failure(now, "boom");
        assert_eq!((state.cycle_count, state.consecutive_failures), (2, 2));

        state.record_success(now, false);
        assert_eq!((state.cycle_count, state.consecutive_failures, state.total_reports), (3, 0, 0));
        assert_eq!(state.last_error, None);

        state.record_success(now, true);
        assert_eq!(state.total_reports, 1);
        assert_eq!(state.last_run_date, "2024-07-03");
    }
}
