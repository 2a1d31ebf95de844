//! Local filesystem key-value store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::store::{validate_key, KeyValueStore};
use stocksync_common::{Error, Result};

/// Extension of value files.
const VALUE_EXT: &str = "json";

/// Local filesystem key-value store.
///
/// Every key is stored as one file `<root>/<key>.json`. Writes go to a
/// temporary sibling first and are moved into place with a rename, so a
/// crash mid-write leaves the previous value intact.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, VALUE_EXT))
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        match fs::read_to_string(self.value_path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read {}: {}", key, e))),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        validate_key(key)?;
        let target = self.value_path(key);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&tmp, value.as_bytes()).await {
            return Err(Error::Storage(format!("Failed to write {}: {}", key, e)));
        }

        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!("Failed to replace {}: {}", key, e)));
        }

        debug!("Stored {} bytes under {}", value.len(), key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match fs::remove_file(self.value_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to remove {}: {}", key, e))),
        }
    }
}
