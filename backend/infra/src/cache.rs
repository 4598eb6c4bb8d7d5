//! Cache Store
//!
//! Entries live at `<root>/<source>/<key>.json`, with both names
//! percent-encoded so distinct `(source, key)` pairs never share a file. Expiry is lazy: an expired
//! entry is ignored on read and only replaced by a later `set` (or removed by
//! an explicit `sweep_expired`). Reads never fail; anything unreadable is a miss.
//!
//! Concurrent writers to the same `(source, key)` are not coordinated.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

/// One persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source: String,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Outcome of a cache read, with the reason for a miss.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    /// No entry on disk.
    Miss,
    /// An entry exists but its `expires_at` has passed.
    Expired { expired_at: DateTime<Utc> },
    /// The entry could not be read or parsed.
    Corrupt(String),
}

impl<T> CacheLookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// Filesystem-backed cache, namespaced by source.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source_dir(&self, source: &str) -> PathBuf {
        self.root.join(encode_component(source))
    }

    fn entry_path(&self, source: &str, key: &str) -> PathBuf {
        self.source_dir(source).join(format!("{}.json", encode_component(key)))
    }

    /// Store `data` for `ttl_hours` hours, replacing any existing entry.
    pub async fn set<T: Serialize>(
        &self,
        source: &str,
        key: &str,
        data: &T,
        ttl_hours: f64,
    ) -> Result<()> {
        if !ttl_hours.is_finite() {
            bail!("Cache TTL must be finite, got {ttl_hours}");
        }
        let ttl = Duration::try_milliseconds((ttl_hours * 3_600_000.0) as i64)
            .with_context(|| format!("Cache TTL out of range: {ttl_hours} hours"))?;
        self.set_with_ttl(source, key, data, ttl).await
    }

    /// Store `data` with an explicit TTL. A negative TTL produces an entry
    /// that is already expired; a TTL past the end of the calendar is an error.
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        source: &str,
        key: &str,
        data: &T,
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .with_context(|| format!("Cache TTL out of range: {ttl}"))?;

        let dir = self.source_dir(source);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        let entry = CacheEntry {
            data,
            fetched_at: now,
            expires_at,
            source: source.to_string(),
        };
        let json = serde_json::to_vec_pretty(&entry).context("Failed to serialize cache entry")?;

        let path = self.entry_path(source, key);
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", path.display()))?;

        debug!(source, key, expires_at = %entry.expires_at, "Cache set");
        Ok(())
    }

    /// Read an entry and say why it was not usable, if it was not.
    pub async fn lookup<T: DeserializeOwned>(&self, source: &str, key: &str) -> CacheLookup<T> {
        let path = self.entry_path(source, key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return CacheLookup::Miss,
            Err(e) => {
                warn!(source, key, error = %e, "Unreadable cache entry; treating as miss");
                return CacheLookup::Corrupt(e.to_string());
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(source, key, error = %e, "Corrupt cache entry; treating as miss");
                return CacheLookup::Corrupt(e.to_string());
            }
        };

        if entry.is_fresh_at(Utc::now()) {
            debug!(source, key, "Cache hit");
            CacheLookup::Hit(entry.data)
        } else {
            debug!(source, key, expired_at = %entry.expires_at, "Cache entry expired");
            CacheLookup::Expired { expired_at: entry.expires_at }
        }
    }

    /// The cached value, if present and not expired.
    pub async fn get<T: DeserializeOwned>(&self, source: &str, key: &str) -> Option<T> {
        self.lookup(source, key).await.into_option()
    }

    /// True iff `get` would return a value.
    pub async fn has(&self, source: &str, key: &str) -> bool {
        self.lookup::<serde_json::Value>(source, key).await.is_hit()
    }

    /// Remove one source namespace, or the whole cache when `source` is `None`.
    pub async fn clear(&self, source: Option<&str>) -> Result<()> {
        let target = match source {
            Some(source) => self.source_dir(source),
            None => self.root.clone(),
        };
        match fs::remove_dir_all(&target).await {
            Ok(()) => {
                info!(path = %target.display(), "Cleared cache");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to clear cache: {}", target.display()))
            }
        }
    }

    /// Source namespaces currently on disk, in directory enumeration order.
    ///
    /// Directories that are not encoded source names are ignored.
    pub async fn sources(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(root = %self.root.display(), error = %e, "Failed to list cache sources");
                }
                return out;
            }
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let file_name = entry.file_name();
            match file_name.to_str().and_then(decode_component) {
                Some(source) => out.push(source),
                None => debug!(dir = ?file_name, "Skipping foreign directory in cache root"),
            }
        }
        out
    }

    /// Delete expired and corrupt entries across all sources.
    ///
    /// Never called implicitly; returns the number of files removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for source in self.sources().await {
            let dir = self.source_dir(&source);
            let mut entries = fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read cache directory: {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let stale = match fs::read_to_string(&path).await {
                    Ok(raw) => match serde_json::from_str::<CacheEntry<serde_json::Value>>(&raw) {
                        Ok(cached) => !cached.is_fresh_at(now),
                        Err(_) => true,
                    },
                    Err(_) => true,
                };
                if stale {
                    match fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Failed to sweep cache entry")
                        }
                    }
                }
            }
        }

        info!(removed, "Cache sweep finished");
        Ok(removed)
    }
}

/// Map a source or key onto a single path component.
///
/// Bytes outside `[A-Za-z0-9.-]` become `%XX`, as does a leading `.`; the
/// empty name is `_`, which no other name can produce. The mapping is
/// injective and `decode_component` inverts it.
fn encode_component(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'-' || (byte == b'.' && i > 0);
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_component(encoded: &str) -> Option<String> {
    if encoded == "_" {
        return Some(String::new());
    }
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = encoded
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'_' => return None,
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}
