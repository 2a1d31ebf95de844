//! Typed access to a key-value store through JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use stocksync_common::{Error, Result};
use crate::store::KeyValueStore;

/// Typed JSON view over a [`KeyValueStore`].
///
/// Cheap to clone; clones share the underlying store.
#[derive(Clone)]
pub struct DurableStore {
    inner: Arc<dyn KeyValueStore>,
}

impl DurableStore {
    /// Wrap a store.
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Read and decode the value under `key`.
    ///
    /// # Returns
    /// `Ok(None)` when the key is absent.
    ///
    /// # Errors
    /// - Backend read failure
    /// - Stored text is not valid JSON for `T`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get(key).await? {
            Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
                Error::Serialization(format!("Corrupt value under {}: {}", key, e))
            }),
            None => Ok(None),
        }
    }

    /// Read the value under `key`, treating any failure as absence.
    ///
    /// Read failures are logged and degrade to `None`.
    pub async fn get_or_absent<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Treating unreadable key {} as absent: {}", key, e);
                None
            }
        }
    }

    /// Encode and store `value` under `key`.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.inner.set(key, text).await
    }

    /// Stored text under `key`, undecoded.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    /// Store `text` under `key` as is.
    pub async fn set_raw(&self, key: &str, text: String) -> Result<()> {
        self.inner.set(key, text).await
    }

    /// Remove the value under `key`.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }
}
