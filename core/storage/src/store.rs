//! Key-value store trait definition.

use async_trait::async_trait;

use stocksync_common::{Error, Result};

/// Durable string store addressed by flat keys.
///
/// Values are opaque strings; typed access lives in [`crate::DurableStore`].
/// Implementations must keep a value across process restarts unless they
/// document otherwise (see [`crate::MemoryStore`]).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    ///
    /// # Returns
    /// `None` when nothing is stored under the key.
    ///
    /// # Errors
    /// - Backend unreadable or corrupted
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Postconditions
    /// - A later `get(key)` returns `value`, also after a restart
    ///
    /// # Errors
    /// - Quota exceeded, permission denied, backend unavailable
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove the value under `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Validate a storage key.
///
/// Keys are flat names: non-empty, no path separators, no leading dot.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("Storage key cannot be empty".to_string()));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(Error::InvalidInput(
            "Storage key cannot contain separators".to_string(),
        ));
    }
    if key.starts_with('.') {
        return Err(Error::InvalidInput(
            "Storage key cannot start with '.'".to_string(),
        ));
    }
    Ok(())
}
