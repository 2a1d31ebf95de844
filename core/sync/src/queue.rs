//! Durable log of mutations waiting for the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use stocksync_common::{Error, Record, RecordId, Result};
use stocksync_storage::DurableStore;

/// Idempotency key of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    /// Reserved. Nothing produces it and replay leaves it in place.
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A mutation together with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Operation {
    /// Create the full record on the server.
    Create(Record),
    /// Reserved.
    Update(Record),
    /// Delete the record with this id.
    Delete(RecordId),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create(_) => OperationKind::Create,
            Operation::Update(_) => OperationKind::Update,
            Operation::Delete(_) => OperationKind::Delete,
        }
    }

    /// Record id this operation touches.
    pub fn record_id(&self) -> RecordId {
        match self {
            Operation::Create(record) | Operation::Update(record) => record.id,
            Operation::Delete(id) => *id,
        }
    }
}

/// An entry of the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique ID for this entry.
    pub id: OperationId,
    pub operation: Operation,
    /// When the entry was queued.
    pub queued_at: DateTime<Utc>,
}

impl QueuedOperation {
    pub fn new(operation: Operation) -> Self {
        Self {
            id: OperationId::new(),
            operation,
            queued_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

/// Ordered, durable queue of pending operations.
///
/// The whole queue lives under one key and is rewritten on every change.
/// Callers must serialize mutations; the queue itself does no locking.
pub struct OperationQueue {
    store: DurableStore,
    key: String,
}

impl OperationQueue {
    /// Create a queue stored under `key`.
    pub fn new(store: DurableStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Key a corrupt queue is moved to.
    pub fn backup_key(&self) -> String {
        format!("{}_corrupt", self.key)
    }

    /// Append an operation.
    ///
    /// # Postconditions
    /// - The entry is persisted after every entry enqueued before it
    ///
    /// # Errors
    /// - The storage backend cannot be read
    /// - The updated queue cannot be written
    pub async fn enqueue(&self, operation: Operation) -> Result<QueuedOperation> {
        let mut entries = self.list_for_update().await?;
        let entry = QueuedOperation::new(operation);
        entries.push(entry.clone());
        self.store.set(&self.key, &entries).await?;

        debug!(
            "Queued {} {} for record {}",
            entry.kind(),
            entry.id,
            entry.operation.record_id()
        );
        Ok(entry)
    }

    /// All entries, oldest first. Empty if nothing is stored.
    pub async fn list(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self
            .store
            .get::<Vec<QueuedOperation>>(&self.key)
            .await?
            .unwrap_or_default())
    }

    /// Entries for a read-modify-write.
    ///
    /// A stored queue that no longer decodes is moved aside under
    /// [`OperationQueue::backup_key`] and replaced by an empty one. Backend
    /// read failures are returned as is, since nothing can be preserved.
    pub async fn list_for_update(&self) -> Result<Vec<QueuedOperation>> {
        match self.list().await {
            Err(Error::Serialization(reason)) => {
                let backup = self.backup_key();
                warn!("Queue under {} is corrupt, moving it to {}: {}", self.key, backup, reason);
                if let Some(text) = self.store.get_raw(&self.key).await? {
                    self.store.set_raw(&backup, text).await?;
                }
                self.store.set(&self.key, &Vec::<QueuedOperation>::new()).await?;
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Remove one entry. Unknown ids are ignored.
    ///
    /// # Returns
    /// Whether an entry was removed.
    pub async fn remove(&self, id: OperationId) -> Result<bool> {
        Ok(self.remove_many(&[id]).await? == 1)
    }

    /// Remove several entries with a single write.
    ///
    /// # Returns
    /// Number of entries removed.
    pub async fn remove_many(&self, ids: &[OperationId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut entries = self.list_for_update().await?;
        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));
        let removed = before - entries.len();

        if removed > 0 {
            self.store.set(&self.key, &entries).await?;
        }
        Ok(removed)
    }

    /// Drop the whole queue.
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(&self.key).await
    }
}
