use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::CachedData;

/// Local persistent key-value store for values shown while offline.
///
/// Values are mirrors only; the backend stays the source of truth.
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>>;

    fn put_raw(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

impl dyn KeyValueStore {
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CachedData<T>>> {
        match self.get_raw(key)? {
            Some(contents) => {
                let cached: CachedData<T> = serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse cached value: {}", key))?;
                Ok(Some(cached))
            }
            None => Ok(None),
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let contents = serde_json::to_string_pretty(&CachedData::new(data))?;
        self.put_raw(key, &contents)
    }

    /// Age of a stored value for display, logging errors without failing
    pub fn age_display(&self, key: &str) -> Option<String> {
        match self.load::<serde_json::Value>(key) {
            Ok(Some(cached)) => Some(cached.age_display()),
            Ok(None) => None,
            Err(e) => {
                debug!(key = key, error = %e, "Failed to load cached value for age display");
                None
            }
        }
    }
}

/// Keys become file names, so they are restricted to a safe alphabet.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Invalid cache key: {:?}", key))
    }
}

/// One JSON file per key in the cache directory.
pub struct FileStore {
    cache_dir: PathBuf,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.cache_dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let path = self.cache_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", key))?;
        Ok(Some(contents))
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let path = self.cache_path(key)?;
        std::fs::write(&path, value)
            .with_context(|| format!("Failed to write cache file: {}", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.cache_path(key)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and for running without a cache directory.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}
