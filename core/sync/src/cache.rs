//! Last-known-good snapshot of the catalog.

use std::collections::HashSet;

use stocksync_common::{Error, Record, RecordId, Result};
use stocksync_storage::DurableStore;

use crate::queue::{Operation, QueuedOperation};

/// Persisted snapshot of the record list, stored under one key.
pub struct RecordCache {
    store: DurableStore,
    key: String,
}

impl RecordCache {
    pub fn new(store: DurableStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Load the snapshot. Empty if nothing was stored yet.
    pub async fn load(&self) -> Result<Vec<Record>> {
        Ok(self
            .store
            .get::<Vec<Record>>(&self.key)
            .await?
            .unwrap_or_default())
    }

    /// Load the snapshot, degrading read failures to an empty list.
    pub async fn load_or_empty(&self) -> Vec<Record> {
        self.store
            .get_or_absent::<Vec<Record>>(&self.key)
            .await
            .unwrap_or_default()
    }

    /// Overwrite the whole snapshot.
    pub async fn replace(&self, records: &[Record]) -> Result<()> {
        self.store.set(&self.key, records).await
    }

    /// Append one record.
    pub async fn push(&self, record: Record) -> Result<()> {
        let mut records = self.load_or_empty().await;
        records.push(record);
        self.replace(&records).await
    }

    /// Remove every record with `id`.
    ///
    /// # Returns
    /// Whether anything was removed. Nothing is written if not.
    pub async fn remove(&self, id: RecordId) -> Result<bool> {
        let mut records = self.load_or_empty().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.replace(&records).await?;
        Ok(true)
    }
}

/// Overlay still-queued local writes on a fresh server listing.
///
/// Records targeted by a queued delete are dropped, and queued creates are
/// appended in queue order with their placeholder ids, so speculative offline
/// writes stay visible until replay confirms them.
pub fn overlay_pending(server: Vec<Record>, pending: &[QueuedOperation]) -> Vec<Record> {
    let deleted: HashSet<RecordId> = pending
        .iter()
        .filter_map(|entry| match &entry.operation {
            Operation::Delete(id) => Some(*id),
            _ => None,
        })
        .collect();

    let mut merged: Vec<Record> = server
        .into_iter()
        .filter(|r| !deleted.contains(&r.id))
        .collect();

    for entry in pending {
        if let Operation::Create(record) = &entry.operation {
            if !merged.iter().any(|r| r.id == record.id) {
                merged.push(record.clone());
            }
        }
    }

    merged
}

/// Next free placeholder id.
///
/// One below the smallest id seen in the snapshot or in queued creates, so
/// ids never collide and keep decreasing across restarts.
///
/// # Errors
/// - The placeholder range is exhausted
pub fn next_placeholder(cached: &[Record], pending: &[QueuedOperation]) -> Result<RecordId> {
    let queued = pending.iter().filter_map(|entry| match &entry.operation {
        Operation::Create(record) | Operation::Update(record) => Some(record.id.as_i32()),
        Operation::Delete(id) => Some(id.as_i32()),
    });

    let lowest = cached
        .iter()
        .map(|r| r.id.as_i32())
        .chain(queued)
        .min()
        .unwrap_or(0)
        .min(0);

    let seq = 1i32
        .checked_sub(lowest)
        .ok_or_else(|| Error::InvalidInput("placeholder ids exhausted".to_string()))?;
    RecordId::pending(seq)
}
