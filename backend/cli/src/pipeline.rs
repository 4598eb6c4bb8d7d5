//! The daily report pipeline run inside each heartbeat cycle.
//!
//! collect (cache, else fetch with retry) → merge → deltas against the last
//! earlier report → anomaly scan → save today's report.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use signalforge_analysis::{apply_deltas, detect_signal_anomalies};
use signalforge_core::{Report, SignalError, SignalSet};
use signalforge_infra::{CacheLookup, CacheStore, ReportStore};
use signalforge_logging::redact_sensitive_data;
use signalforge_scheduler::{with_retry, Pipeline, PipelineOutput, RetryPolicy};
use tracing::{debug, info, warn};

use crate::sources::ConfiguredSource;

/// Cache key under which each source's latest bundle is stored.
pub const BUNDLE_KEY: &str = "bundle";

pub struct ReportPipeline {
    sources: Vec<ConfiguredSource>,
    cache: CacheStore,
    reports: ReportStore,
    retry: RetryPolicy,
    threshold: f64,
}

impl ReportPipeline {
    pub fn new(
        sources: Vec<ConfiguredSource>,
        cache: CacheStore,
        reports: ReportStore,
        retry: RetryPolicy,
        threshold: f64,
    ) -> Self {
        Self { sources, cache, reports, retry, threshold }
    }

    async fn fetch_source(&self, entry: &ConfiguredSource) -> Result<SignalSet, SignalError> {
        let name = entry.source.name();
        match self.cache.lookup::<SignalSet>(name, BUNDLE_KEY).await {
            CacheLookup::Hit(set) => {
                debug!(source = name, records = set.len(), "Using cached bundle");
                return Ok(set);
            }
            CacheLookup::Expired { expired_at } => {
                debug!(source = name, %expired_at, "Cached bundle expired")
            }
            CacheLookup::Corrupt(reason) => {
                warn!(source = name, reason = %reason, "Cached bundle unusable")
            }
            CacheLookup::Miss => {}
        }

        let set = with_retry(name, &self.retry, || entry.source.fetch())
            .await
            .map_err(|e| SignalError::SourceFailed {
                source_name: name.to_string(),
                message: redact_sensitive_data(&format!("{e:#}")),
            })?;

        if let Err(e) = self.cache.set(name, BUNDLE_KEY, &set, entry.ttl_hours).await {
            warn!(source = name, error = %e, "Failed to cache bundle");
        }
        Ok(set)
    }

    /// Merge every source's bundle. Failed sources are skipped; the whole
    /// collection fails only when none succeeded.
    pub async fn collect(&self) -> Result<SignalSet, SignalError> {
        if self.sources.is_empty() {
            return Err(SignalError::ConfigError("no sources configured".into()));
        }

        let mut merged = SignalSet::default();
        let mut failed = 0;
        for entry in &self.sources {
            match self.fetch_source(entry).await {
                Ok(set) => merged.merge(set),
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "Skipping source for this cycle");
                }
            }
        }

        if failed == self.sources.len() {
            return Err(SignalError::AllSourcesFailed(failed));
        }
        info!(
            sources = self.sources.len() - failed,
            failed,
            records = merged.len(),
            "Collected signals"
        );
        Ok(merged)
    }
}

#[async_trait]
impl Pipeline for ReportPipeline {
    async fn run(&self) -> Result<PipelineOutput> {
        let now = Utc::now();
        let today = now.format("%Y-%m-%d").to_string();

        let current = self.collect().await?;
        let previous = self.reports.latest_before(&today).await;
        let signals = apply_deltas(current, previous.as_ref());
        let anomalies = detect_signal_anomalies(&signals, self.threshold);

        let report = Report::new(now, signals, anomalies);
        let path = self.reports.save(&report).await?;

        Ok(PipelineOutput {
            produced_report: true,
            summary: Some(format!(
                "{} records, {} anomalies, baseline {} -> {}",
                report.signals.len(),
                report.anomalies.len(),
                previous.as_ref().map(|p| p.date.as_str()).unwrap_or("none"),
                path.display()
            )),
        })
    }
}
