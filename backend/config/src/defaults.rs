//! Config defaults: derives every unset path from `paths.dataDir`.

use std::path::{Path, PathBuf};

use crate::schema::{PathsConfig, ResolvedPaths, SignalForgeConfig};

pub const CACHE_DIR_NAME: &str = "cache";
pub const REPORTS_DIR_NAME: &str = "reports";
pub const LOCK_FILE_NAME: &str = "heartbeat.lock";
pub const STATE_FILE_NAME: &str = "state.json";
pub const LOG_DIR_NAME: &str = "logs";

/// Apply all defaults to a freshly loaded config.
///
/// `fallback_data_dir` is used when `paths.dataDir` is unset, normally the
/// config directory itself.
pub fn apply_all_defaults(
    config: SignalForgeConfig,
    fallback_data_dir: &Path,
) -> SignalForgeConfig {
    let config = apply_path_defaults(config, fallback_data_dir);
    apply_source_defaults(config)
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn apply_path_defaults(
    mut config: SignalForgeConfig,
    fallback_data_dir: &Path,
) -> SignalForgeConfig {
    let paths = &mut config.paths;
    let data_dir = expand_home(paths.data_dir.as_deref().unwrap_or(fallback_data_dir));

    fn fill(slot: &mut Option<PathBuf>, default: PathBuf) {
        *slot = Some(match slot.take() {
            Some(p) => expand_home(&p),
            None => default,
        });
    }
    fill(&mut paths.cache_dir, data_dir.join(CACHE_DIR_NAME));
    fill(&mut paths.reports_dir, data_dir.join(REPORTS_DIR_NAME));
    fill(&mut paths.lock_file, data_dir.join(LOCK_FILE_NAME));
    fill(&mut paths.state_file, data_dir.join(STATE_FILE_NAME));
    fill(&mut paths.log_dir, data_dir.join(LOG_DIR_NAME));
    paths.data_dir = Some(data_dir);
    config
}

/// Expand `~` in file source paths.
fn apply_source_defaults(mut config: SignalForgeConfig) -> SignalForgeConfig {
    for source in &mut config.sources {
        if let Some(path) = &source.path {
            source.path = Some(expand_home(path));
        }
    }
    config
}

impl PathsConfig {
    /// Every path, with the same derivation as [`apply_all_defaults`] for
    /// anything still unset.
    pub fn resolve(&self, fallback_data_dir: &Path) -> ResolvedPaths {
        let data_dir = expand_home(self.data_dir.as_deref().unwrap_or(fallback_data_dir));
        let pick = |slot: &Option<PathBuf>, name: &str| {
            slot.as_deref().map(expand_home).unwrap_or_else(|| data_dir.join(name))
        };
        ResolvedPaths {
            cache_dir: pick(&self.cache_dir, CACHE_DIR_NAME),
            reports_dir: pick(&self.reports_dir, REPORTS_DIR_NAME),
            lock_file: pick(&self.lock_file, LOCK_FILE_NAME),
            state_file: pick(&self.state_file, STATE_FILE_NAME),
            log_dir: pick(&self.log_dir, LOG_DIR_NAME),
            data_dir,
        }
    }
}
