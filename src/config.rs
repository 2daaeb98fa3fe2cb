//! Access layer configuration.
//!
//! Defaults can be persisted to a per-user config file. Environment
//! variables override any stored values so managed deployments can tune
//! limits without touching the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DalConfig {
    /// Page size when neither the request nor the table settings give one
    pub default_page_size: u64,
    /// Budget for the exact `COUNT(*)` before falling back to an estimate
    pub count_timeout_ms: u64,
    pub autocomplete_row_limit: u64,
    /// Tables at or above this many rows are flagged as large
    pub large_dataset_threshold: u64,
    pub connect_timeout_ms: u64,
    pub test_timeout_ms: u64,
    pub pool_max_connections: u32,
    /// Documents sampled to infer a collection's structure
    pub structure_sample_size: u64,
}

impl Default for DalConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            count_timeout_ms: 2_000,
            autocomplete_row_limit: 20,
            large_dataset_threshold: 100_000,
            connect_timeout_ms: 15_000,
            test_timeout_ms: 10_000,
            pool_max_connections: 5,
            structure_sample_size: 100,
        }
    }
}

fn env_u64_opt(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(key, value = %raw, "ignoring invalid numeric override");
            None
        }
    }
}

fn config_path() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var_os("APPDATA")
            .unwrap_or_else(|| std::env::var_os("USERPROFILE").unwrap_or_default());
        let mut path = PathBuf::from(appdata);
        path.push("Datagate");
        path.push("config.json");
        path
    } else {
        let home = std::env::var_os("HOME").unwrap_or_default();
        let mut path = PathBuf::from(home);
        path.push(".datagate");
        path.push("config.json");
        path
    }
}

fn load_from_file(path: &Path) -> Option<DalConfig> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable config file, using defaults");
            None
        }
    }
}

impl DalConfig {
    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_u64_opt("DATAGATE_DEFAULT_PAGE_SIZE") {
            self.default_page_size = value;
        }
        if let Some(value) = env_u64_opt("DATAGATE_COUNT_TIMEOUT_MS") {
            self.count_timeout_ms = value;
        }
        if let Some(value) = env_u64_opt("DATAGATE_AUTOCOMPLETE_LIMIT") {
            self.autocomplete_row_limit = value;
        }
        if let Some(value) = env_u64_opt("DATAGATE_LARGE_DATASET_THRESHOLD") {
            self.large_dataset_threshold = value;
        }
        if let Some(value) = env_u64_opt("DATAGATE_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = value;
        }
        if let Some(value) = env_u64_opt("DATAGATE_POOL_MAX_CONNECTIONS") {
            self.pool_max_connections = u32::try_from(value).unwrap_or(u32::MAX);
        }
    }

    /// Loads the config file if present, then applies environment overrides
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        let mut config = load_from_file(path).unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    pub fn count_timeout(&self) -> Duration {
        Duration::from_millis(self.count_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }
}
