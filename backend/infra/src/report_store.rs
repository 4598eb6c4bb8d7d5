//! Report Store
//!
//! One `YYYY-MM-DD.json` file per day. Writes go through a temp sibling and
//! a rename so a crash never leaves a half-written report behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use signalforge_core::Report;
use tokio::fs;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}.json"))
    }

    /// Persist a report under its date, replacing any earlier one for that day.
    pub async fn save(&self, report: &Report) -> Result<PathBuf> {
        NaiveDate::parse_from_str(&report.date, DATE_FORMAT)
            .with_context(|| format!("Report date is not YYYY-MM-DD: {}", report.date))?;

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| {
                format!("Failed to create reports directory: {}", self.dir.display())
            })?;

        let json = serde_json::to_vec_pretty(report).context("Failed to serialize report")?;
        let path = self.path_for(&report.date);
        let tmp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));

        if let Err(e) = fs::write(&tmp_path, &json).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e)
                .with_context(|| format!("Failed to write temp report: {}", tmp_path.display()));
        }
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e)
                .with_context(|| format!("Failed to rename temp report to: {}", path.display()));
        }

        info!(path = %path.display(), anomalies = report.anomalies.len(), "Wrote report");
        Ok(path)
    }

    /// Load the report for `date`, if one exists.
    pub async fn load(&self, date: &str) -> Result<Option<Report>> {
        let path = self.path_for(date);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read report: {}", path.display()));
            }
        };
        let report = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse report: {}", path.display()))?;
        Ok(Some(report))
    }

    /// Dates with a report on disk, oldest first.
    pub async fn list_dates(&self) -> Vec<String> {
        let mut dates = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %self.dir.display(), error = %e, "Failed to list reports");
                }
                return dates;
            }
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(".json") else { continue };
            if NaiveDate::parse_from_str(stem, DATE_FORMAT).is_ok() {
                dates.push(stem.to_string());
            }
        }
        dates.sort();
        dates
    }

    /// The newest report dated strictly before `date`.
    ///
    /// Today's own report is never returned, so a retried cycle does not
    /// diff against itself. Unparsable reports are skipped.
    pub async fn latest_before(&self, date: &str) -> Option<Report> {
        for candidate in self.list_dates().await.into_iter().rev() {
            if candidate.as_str() >= date {
                continue;
            }
            match self.load(&candidate).await {
                Ok(Some(report)) => {
                    debug!(date = %candidate, "Loaded previous report");
                    return Some(report);
                }
                Ok(None) => continue,
                Err(e) => warn!(date = %candidate, error = %e, "Skipping unreadable report"),
            }
        }
        warn!(before = date, "No previous report; treating as first run");
        None
    }

    /// The newest report on disk, including today's.
    pub async fn latest(&self) -> Option<Report> {
        let dates = self.list_dates().await;
        let last = dates.last()?;
        match self.load(last).await {
            Ok(report) => report,
            Err(e) => {
                warn!(date = %last, error = %e, "Latest report unreadable");
                None
            }
        }
    }
}
