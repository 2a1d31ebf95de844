//! In-process catalog server for testing.

use async_trait::async_trait;
use chrono::Local;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use stocksync_common::{Error, Record, RecordId, Result};

use super::{DeleteOutcome, RemoteCatalog};

struct Inner {
    records: Vec<Record>,
    next_id: i32,
}

/// In-memory catalog with the same semantics as the REST API.
///
/// Create resets the id and both timestamps and assigns increasing positive
/// ids; deleting an unknown id reports [`DeleteOutcome::AlreadyGone`].
/// `set_reachable(false)` makes every call fail with `Error::Network`.
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    /// Create a catalog seeded with server records.
    pub fn with_records(records: Vec<Record>) -> Self {
        let next_id = records
            .iter()
            .filter_map(|r| r.id.server_id())
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            inner: Mutex::new(Inner { records, next_id }),
            reachable: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the server going away or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of API calls received so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current server-side records.
    pub fn records(&self) -> Vec<Record> {
        self.inner
            .lock()
            .map(|inner| inner.records.clone())
            .unwrap_or_default()
    }

    fn enter(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::Network("catalog unreachable".to_string()));
        }
        self.inner
            .lock()
            .map_err(|_| Error::Http {
                status: 500,
                message: "catalog state poisoned".to_string(),
            })
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteCatalog for MemoryCatalog {
    async fn fetch_all(&self) -> Result<Vec<Record>> {
        Ok(self.enter()?.records.clone())
    }

    async fn create(&self, record: &Record) -> Result<Option<Record>> {
        let mut inner = self.enter()?;
        let mut stored = record.clone();
        stored.id = RecordId::server(inner.next_id)?;
        stored.stamp(Local::now().naive_local());
        inner.next_id += 1;
        inner.records.push(stored.clone());
        Ok(Some(stored))
    }

    async fn delete(&self, id: i32) -> Result<DeleteOutcome> {
        let mut inner = self.enter()?;
        let before = inner.records.len();
        inner.records.retain(|r| r.id.as_i32() != id);
        if inner.records.len() == before {
            Ok(DeleteOutcome::AlreadyGone)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }
}
