//! Resolved runtime context shared by every subcommand.

use std::path::{Path, PathBuf};

use anyhow::Result;
use signalforge_config::{config_file_path, load_and_prepare, ResolvedPaths, SignalForgeConfig};
use signalforge_infra::{CacheStore, ReportStore};
use signalforge_scheduler::{FileLock, HeartbeatConfig, HeartbeatScheduler, RetryPolicy};

use crate::pipeline::ReportPipeline;
use crate::sources::build_sources;

pub struct AppContext {
    pub config_path: PathBuf,
    pub config: SignalForgeConfig,
    pub paths: ResolvedPaths,
}

impl AppContext {
    /// Load `config.yaml` from `config_dir` with env overrides and defaults applied.
    pub async fn load(config_dir: &Path) -> Result<Self> {
        let config_path = config_file_path(config_dir);
        let config = load_and_prepare(&config_path).await?;
        let paths = config.paths.resolve(config_dir);
        Ok(Self { config_path, config, paths })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.config.retry;
        RetryPolicy::new(retry.max_attempts, retry.base_delay_ms, retry.max_delay_ms)
    }

    pub fn cache(&self) -> CacheStore {
        CacheStore::new(&self.paths.cache_dir)
    }

    pub fn reports(&self) -> ReportStore {
        ReportStore::new(&self.paths.reports_dir)
    }

    pub fn lock(&self) -> FileLock {
        FileLock::new(&self.paths.lock_file)
    }

    pub fn scheduler(&self, run_on_start: bool) -> HeartbeatScheduler<FileLock> {
        let config = HeartbeatConfig {
            hour_utc: self.config.heartbeat.hour_utc,
            state_path: self.paths.state_file.clone(),
            run_on_start: run_on_start || self.config.heartbeat.run_on_start,
        };
        HeartbeatScheduler::new(config, self.lock())
    }

    pub fn pipeline(&self) -> Result<ReportPipeline> {
        Ok(ReportPipeline::new(
            build_sources(&self.config)?,
            self.cache(),
            self.reports(),
            self.retry_policy(),
            self.config.anomaly.threshold,
        ))
    }
}
