//! In-memory key-value store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stocksync_common::{Error, Result};
use crate::store::{validate_key, KeyValueStore};

/// In-memory key-value store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same map, which lets a test
/// "restart" a client by building a new one over the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw access for tests that need to plant or inspect stored text.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("memory store lock poisoned".to_string())
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        validate_key(key)?;
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}
