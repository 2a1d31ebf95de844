//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stocksync_common::{Error, Result};
use stocksync_storage::validate_key;

/// Default collection URL of the product entries API.
pub const DEFAULT_API_URL: &str = "http://localhost:5188/api/productentries";
/// Storage key of the record snapshot.
pub const DEFAULT_CACHE_KEY: &str = "cached_entries";
/// Storage key of the operation queue.
pub const DEFAULT_QUEUE_KEY: &str = "sync_queue";

/// Connectivity probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// URL pinged to decide reachability. Any response counts as online.
    pub url: String,
    /// Time between probes.
    #[serde(with = "millis")]
    pub interval: Duration,
    /// Per-probe timeout.
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: "https://www.google.com/favicon.ico".to_string(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Configuration of a sync client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Collection URL of the remote catalog.
    pub api_base_url: String,
    /// Directory holding the local store.
    pub data_dir: PathBuf,
    pub cache_key: String,
    pub queue_key: String,
    pub probe: ProbeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stocksync");
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            data_dir,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            probe: ProbeConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    ///
    /// # Errors
    /// - File exists but cannot be read
    /// - Content is not valid configuration JSON
    /// - Resulting configuration fails [`ClientConfig::validate`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::Serialization(format!("Invalid config {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(Error::Io(e)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Override the API URL.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Check the values that cannot be defaulted.
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(Error::InvalidInput("api_base_url cannot be empty".to_string()));
        }
        validate_key(&self.cache_key)?;
        validate_key(&self.queue_key)?;
        if self.cache_key == self.queue_key
            || self.cache_key == format!("{}_corrupt", self.queue_key)
        {
            return Err(Error::InvalidInput(
                "cache_key and queue_key must differ".to_string(),
            ));
        }
        if self.probe.interval.is_zero() {
            return Err(Error::InvalidInput("probe interval must be positive".to_string()));
        }
        Ok(())
    }
}

/// Durations as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
