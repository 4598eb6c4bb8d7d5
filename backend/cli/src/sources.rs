//! Signal source adapters built from config.
//!
//! Both kinds yield a JSON `SignalSet` produced by an external collector:
//! `file` reads a snapshot from disk, `http` GETs one from a service.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use signalforge_config::{
    redact_url, SignalForgeConfig, SourceConfig, SourceKind, DEFAULT_HTTP_TIMEOUT_SECS,
};
use signalforge_core::{SignalError, SignalSet, SignalSource};
use signalforge_logging::redact_sensitive_data;
use tracing::debug;

/// A source plus the cache TTL that applies to it.
pub struct ConfiguredSource {
    pub source: Box<dyn SignalSource>,
    pub ttl_hours: f64,
}

pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: path.into() }
    }
}

#[async_trait]
impl SignalSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<SignalSet> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read snapshot: {}", self.path.display()))?;
        let set: SignalSet = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse snapshot: {}", self.path.display()))?;
        debug!(source = %self.name, records = set.len(), "Read file snapshot");
        Ok(set)
    }
}

pub struct HttpSource {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("signalforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { name: name.into(), url: url.into(), headers, client })
    }
}

#[async_trait]
impl SignalSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<SignalSet> {
        let safe_url = redact_url(&self.url);
        let mut request = self.client.get(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!(redact_sensitive_data(&e.without_url().to_string())))
            .with_context(|| format!("GET {safe_url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {safe_url} returned {status}");
        }
        let set: SignalSet = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!(redact_sensitive_data(&e.without_url().to_string())))
            .with_context(|| format!("GET {safe_url} returned an invalid signal set"))?;
        debug!(source = %self.name, records = set.len(), "Fetched http snapshot");
        Ok(set)
    }
}

fn build_source(source: &SourceConfig) -> Result<Box<dyn SignalSource>> {
    let missing = |field: &str| {
        SignalError::ConfigError(format!("source '{}' has no {field}", source.name))
    };
    match source.kind {
        SourceKind::File => {
            let path = source.path.clone().ok_or_else(|| missing("path"))?;
            Ok(Box::new(FileSource::new(&source.name, path)))
        }
        SourceKind::Http => {
            let url = source.url.clone().ok_or_else(|| missing("url"))?;
            let timeout =
                Duration::from_secs(source.timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS));
            Ok(Box::new(HttpSource::new(&source.name, url, source.headers.clone(), timeout)?))
        }
    }
}

/// Every configured source, in config order.
pub fn build_sources(config: &SignalForgeConfig) -> Result<Vec<ConfiguredSource>> {
    config
        .sources
        .iter()
        .map(|source| {
            Ok(ConfiguredSource {
                source: build_source(source)?,
                ttl_hours: config.ttl_hours_for(source),
            })
        })
        .collect()
}
