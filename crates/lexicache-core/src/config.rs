//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the last signed-in user, cache timing
//! and the catalog sizes used for progress percentages.
//!
//! Configuration is stored at `~/.config/lexicache/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::api::client::{DEFAULT_API_BASE_URL, REQUEST_TIMEOUT_SECS};
use crate::models::CategoryTotals;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "lexicache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Progress data is refetched once it is older than this.
pub const DEFAULT_CACHE_EXPIRY_MINUTES: i64 = 5;

/// Minimum gap between two non-forced fetches of the same key.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_user_id: Option<String>,
    pub cache_expiry_minutes: Option<i64>,
    pub debounce_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub catalog: CategoryTotals,
}

/// Timing knobs for the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub cache_expiry: chrono::Duration,
    pub debounce: chrono::Duration,
    pub request_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cache_expiry: chrono::Duration::minutes(DEFAULT_CACHE_EXPIRY_MINUTES),
            debounce: chrono::Duration::milliseconds(DEFAULT_DEBOUNCE_MS as i64),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    /// Store timing, with unset or non-positive values falling back to defaults.
    pub fn store_settings(&self) -> StoreSettings {
        let defaults = StoreSettings::default();
        StoreSettings {
            cache_expiry: self
                .cache_expiry_minutes
                .filter(|m| *m > 0)
                .map(chrono::Duration::minutes)
                .unwrap_or(defaults.cache_expiry),
            debounce: self
                .debounce_ms
                .map(|ms| chrono::Duration::milliseconds(ms as i64))
                .unwrap_or(defaults.debounce),
            request_timeout: self
                .request_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}
