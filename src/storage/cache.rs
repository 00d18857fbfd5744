//! Expiring JSON compute cache.
//!
//! The metrics command caches per-project computations in one JSON file.
//! Expiry is wholesale: if the file's modification time is older than the
//! configured maximum age when the cache is opened, the whole file is
//! discarded and computation starts fresh. There is no per-entry TTL and
//! no locking; a single bot instance is assumed.

use crate::Result;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Name of the metrics cache file under the state directory.
pub const METRICS_CACHE_FILE: &str = "maturity-cache.json";

/// A JSON-object cache file with open-time expiry.
pub struct ExpiringCache {
    path: PathBuf,
}

impl ExpiringCache {
    /// Open the cache at `path`, discarding it if older than `max_age`.
    pub fn open(path: impl Into<PathBuf>, max_age: Duration) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Ok(metadata) = fs::metadata(&path) {
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or_default();
            if age > max_age {
                fs::remove_file(&path)?;
            }
        }
        Ok(Self { path })
    }

    /// Fetch the cached value for `key`, if present.
    pub fn fetch(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_entries()?.get(key).cloned())
    }

    /// Store `value` under `key`, rewriting the whole file.
    pub fn store(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value);
        fs::write(&self.path, serde_json::to_vec_pretty(&Value::Object(entries))?)?;
        Ok(())
    }

    fn read_entries(&self) -> Result<Map<String, Value>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            // The cache is disposable; a mangled file is not worth failing over.
            _ => {
                warn!("cache file {} is unreadable, starting fresh", self.path.display());
                Ok(Map::new())
            }
        }
    }
}
