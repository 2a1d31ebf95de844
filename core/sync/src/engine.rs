//! Offline-first orchestrator: read-through cache, write-ahead queue, replay.

use chrono::Local;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use stocksync_common::{Error, Record, RecordId, Result};
use stocksync_storage::DurableStore;

use crate::cache::{next_placeholder, overlay_pending, RecordCache};
use crate::config::{ClientConfig, DEFAULT_CACHE_KEY, DEFAULT_QUEUE_KEY};
use crate::connectivity::ConnectivityTracker;
use crate::queue::{Operation, OperationQueue, QueuedOperation};
use crate::remote::{DeleteOutcome, RemoteCatalog};

/// How a create was accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The server stored the record right away. The id is unassigned when
    /// the server acknowledged the create without returning the record.
    Synced(Record),
    /// The record was queued under a placeholder id and added to the cache.
    Queued(Record),
}

impl CreateOutcome {
    pub fn record(&self) -> &Record {
        match self {
            CreateOutcome::Synced(record) | CreateOutcome::Queued(record) => record,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, CreateOutcome::Queued(_))
    }
}

/// How a delete was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The server confirmed the delete (or had no such record).
    Synced(DeleteOutcome),
    /// A delete was queued and the record hidden from the cache.
    Queued,
    /// The record only ever existed locally and is gone now.
    Discarded,
}

/// Summary of one replay pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Queue entries submitted to the server.
    pub attempted: usize,
    /// Entries confirmed and removed from the queue.
    pub succeeded: usize,
    /// Entries left in the queue.
    pub failed: usize,
    /// The pass did not run (offline or another pass in flight).
    pub skipped: bool,
    pub duration: Duration,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Queue and snapshot, mutated only under the orchestrator's lock.
struct LocalState {
    queue: OperationQueue,
    cache: RecordCache,
    /// Server ids assigned to replayed placeholders in this process.
    replayed: HashMap<RecordId, RecordId>,
}

/// Clears the in-flight flag when a replay pass ends, however it ends.
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Offline-first front end of the catalog.
///
/// Reads prefer the live server and fall back to the cached snapshot.
/// Writes go to the server when online; otherwise, or when the server call
/// fails, they are queued durably and applied to the snapshot right away.
/// [`SyncOrchestrator::synchronize`] replays the queue in order.
///
/// All read-modify-write cycles on the queue and snapshot run under one
/// async lock. Network calls happen outside it. Writes and replay passes
/// are also serialized against each other by a second lock, always taken
/// before the first, so a write never interleaves with a pass in flight.
pub struct SyncOrchestrator<R: RemoteCatalog + ?Sized> {
    remote: Arc<R>,
    connectivity: Arc<ConnectivityTracker>,
    pass: Mutex<()>,
    local: Mutex<LocalState>,
    replaying: AtomicBool,
}

impl<R: RemoteCatalog + ?Sized> SyncOrchestrator<R> {
    /// Create an orchestrator using the default storage keys.
    pub fn new(remote: Arc<R>, connectivity: Arc<ConnectivityTracker>, store: DurableStore) -> Self {
        Self::with_keys(remote, connectivity, store, DEFAULT_CACHE_KEY, DEFAULT_QUEUE_KEY)
    }

    /// Create an orchestrator using the keys from `config`.
    pub fn from_config(
        remote: Arc<R>,
        connectivity: Arc<ConnectivityTracker>,
        store: DurableStore,
        config: &ClientConfig,
    ) -> Self {
        Self::with_keys(remote, connectivity, store, &config.cache_key, &config.queue_key)
    }

    fn with_keys(
        remote: Arc<R>,
        connectivity: Arc<ConnectivityTracker>,
        store: DurableStore,
        cache_key: &str,
        queue_key: &str,
    ) -> Self {
        Self {
            remote,
            connectivity,
            pass: Mutex::new(()),
            local: Mutex::new(LocalState {
                queue: OperationQueue::new(store.clone(), queue_key),
                cache: RecordCache::new(store, cache_key),
                replayed: HashMap::new(),
            }),
            replaying: AtomicBool::new(false),
        }
    }

    /// The tracker this orchestrator consults.
    pub fn connectivity(&self) -> &Arc<ConnectivityTracker> {
        &self.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Whether a replay pass is running.
    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Entries still waiting for the server, oldest first.
    pub async fn pending_operations(&self) -> Result<Vec<QueuedOperation>> {
        self.local.lock().await.queue.list().await
    }

    /// The cached snapshot, without contacting the server.
    pub async fn cached(&self) -> Vec<Record> {
        self.local.lock().await.cache.load_or_empty().await
    }

    /// All records, from the server when possible.
    ///
    /// Never fails: when offline or when the live fetch fails, the cached
    /// snapshot (possibly empty) is returned. A successful fetch replaces
    /// the snapshot, with still-queued local writes laid over it.
    pub async fn fetch_all(&self) -> Vec<Record> {
        if self.connectivity.is_online() {
            match self.remote.fetch_all().await {
                Ok(server) => return self.store_snapshot(server).await,
                Err(e) => warn!("Live fetch failed, serving cached entries: {}", e),
            }
        } else {
            debug!("Offline, serving cached entries");
        }

        self.cached().await
    }

    async fn store_snapshot(&self, server: Vec<Record>) -> Vec<Record> {
        let local = self.local.lock().await;
        let pending = local.queue.list().await.unwrap_or_else(|e| {
            warn!("Queue unreadable while refreshing cache: {}", e);
            Vec::new()
        });

        let merged = overlay_pending(server, &pending);
        if let Err(e) = local.cache.replace(&merged).await {
            warn!("Failed to refresh cached entries: {}", e);
        }
        merged
    }

    /// Create a record.
    ///
    /// Online, the server is tried first. Otherwise, or if that fails, the
    /// record gets a placeholder id and fresh timestamps, is queued, and is
    /// appended to the snapshot.
    ///
    /// # Errors
    /// - Local storage cannot persist the queued create; nothing is queued
    /// - Placeholder ids are exhausted
    pub async fn create(&self, mut record: Record) -> Result<CreateOutcome> {
        let _pass = self.pass.lock().await;

        if self.connectivity.is_online() {
            match self.remote.create(&record).await {
                Ok(Some(stored)) => {
                    info!("Created entry {} on server", stored.id);
                    return Ok(CreateOutcome::Synced(stored));
                }
                Ok(None) => {
                    info!("Created entry {} on server", record.product_model);
                    record.id = RecordId::Unassigned;
                    return Ok(CreateOutcome::Synced(record));
                }
                Err(e) => warn!("Direct create failed, queueing: {}", e),
            }
        }

        let local = self.local.lock().await;
        let pending = local.queue.list_for_update().await?;
        let cached = local.cache.load_or_empty().await;

        record.id = next_placeholder(&cached, &pending)?;
        record.stamp(Local::now().naive_local());

        let entry = local.queue.enqueue(Operation::Create(record.clone())).await?;
        if let Err(e) = local.cache.push(record.clone()).await {
            if let Err(undo) = local.queue.remove(entry.id).await {
                error!("Failed to withdraw queued create {}: {}", entry.id, undo);
            }
            return Err(e);
        }

        info!(
            "Queued create of {} as placeholder {}",
            record.product_model, record.id
        );
        Ok(CreateOutcome::Queued(record))
    }

    /// Delete a record.
    ///
    /// Placeholder ids are dropped locally together with their queued
    /// create, without any network call. A placeholder whose create was
    /// already replayed by this orchestrator stands for its server id.
    /// Server ids are deleted on the server when online; otherwise, or if
    /// that fails, a delete is queued and the record is hidden from the
    /// snapshot.
    ///
    /// # Errors
    /// - `id` is unassigned
    /// - Local storage cannot persist the change
    pub async fn delete(&self, id: RecordId) -> Result<RemoveOutcome> {
        let _pass = self.pass.lock().await;

        let id = match id {
            RecordId::Pending(_) => match self.local.lock().await.replayed.get(&id) {
                Some(&server) => {
                    debug!("Placeholder {} was replayed as {}", id, server);
                    server
                }
                None => id,
            },
            other => other,
        };

        let server_id = match id {
            RecordId::Unassigned => {
                return Err(Error::InvalidInput("cannot delete an unsaved record".to_string()))
            }
            RecordId::Pending(_) => return self.discard_placeholder(id).await,
            RecordId::Server(server_id) => server_id,
        };

        if self.connectivity.is_online() {
            match self.remote.delete(server_id).await {
                Ok(outcome) => {
                    if outcome == DeleteOutcome::AlreadyGone {
                        info!("Entry {} was already gone on server", id);
                    } else {
                        info!("Deleted entry {} on server", id);
                    }
                    let local = self.local.lock().await;
                    if let Err(e) = local.cache.remove(id).await {
                        warn!("Failed to drop entry {} from cache: {}", id, e);
                    }
                    return Ok(RemoveOutcome::Synced(outcome));
                }
                Err(e) => warn!("Direct delete failed, queueing: {}", e),
            }
        }

        let local = self.local.lock().await;
        let entry = local.queue.enqueue(Operation::Delete(id)).await?;
        if let Err(e) = local.cache.remove(id).await {
            if let Err(undo) = local.queue.remove(entry.id).await {
                error!("Failed to withdraw queued delete {}: {}", entry.id, undo);
            }
            return Err(e);
        }

        info!("Queued delete of entry {}", id);
        Ok(RemoveOutcome::Queued)
    }

    async fn discard_placeholder(&self, id: RecordId) -> Result<RemoveOutcome> {
        let local = self.local.lock().await;
        let unsent: Vec<_> = local
            .queue
            .list_for_update()
            .await?
            .into_iter()
            .filter(|e| matches!(&e.operation, Operation::Create(r) if r.id == id))
            .map(|e| e.id)
            .collect();

        local.cache.remove(id).await?;
        local.queue.remove_many(&unsent).await?;

        debug!("Discarded local-only entry {}", id);
        Ok(RemoveOutcome::Discarded)
    }

    /// Replay queued operations against the server.
    ///
    /// Runs only when online and when no other pass is in flight. Entries
    /// are submitted one by one in queue order; a failing entry stays queued
    /// and does not stop the ones behind it. Confirmed entries are removed
    /// in one write, and if any were confirmed the snapshot is refreshed so
    /// placeholder ids give way to server ids.
    ///
    /// Creates and deletes issued while a pass runs wait for it to finish.
    pub async fn synchronize(&self) -> SyncReport {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync");
            return SyncReport::skipped();
        }

        if self
            .replaying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Replay already in flight, skipping");
            return SyncReport::skipped();
        }
        let _guard = ReplayGuard(&self.replaying);
        let _pass = self.pass.lock().await;

        let start = Instant::now();
        let entries = {
            let local = self.local.lock().await;
            local.queue.list().await.unwrap_or_else(|e| {
                warn!("Queue unreadable, nothing to replay: {}", e);
                Vec::new()
            })
        };

        if entries.is_empty() {
            debug!("Queue empty, nothing to sync");
            return SyncReport {
                duration: start.elapsed(),
                ..SyncReport::default()
            };
        }

        info!("Replaying {} queued operations", entries.len());

        let mut confirmed = Vec::new();
        let mut remapped = Vec::new();
        let mut failed = 0;
        for entry in &entries {
            match self.replay_one(entry).await {
                Ok(assigned) => {
                    confirmed.push(entry.id);
                    if let Some(pair) = assigned {
                        remapped.push(pair);
                    }
                }
                Err(e) => {
                    warn!(
                        "Replay of {} {} for entry {} failed: {}",
                        entry.kind(),
                        entry.id,
                        entry.operation.record_id(),
                        e
                    );
                    failed += 1;
                }
            }
        }

        if !confirmed.is_empty() {
            {
                let mut local = self.local.lock().await;
                local.replayed.extend(remapped);
                if let Err(e) = local.queue.remove_many(&confirmed).await {
                    error!("Failed to drop {} replayed operations: {}", confirmed.len(), e);
                }
            }
            self.fetch_all().await;
        }

        let report = SyncReport {
            attempted: entries.len(),
            succeeded: confirmed.len(),
            failed,
            skipped: false,
            duration: start.elapsed(),
        };
        info!(
            "Sync completed in {:?}: {} synced, {} failed",
            report.duration, report.succeeded, report.failed
        );
        report
    }

    /// Submit one queued entry. For a create, returns the placeholder and
    /// the server id it became, when the server reported one.
    async fn replay_one(&self, entry: &QueuedOperation) -> Result<Option<(RecordId, RecordId)>> {
        match &entry.operation {
            Operation::Create(record) => match self.remote.create(record).await? {
                Some(stored) if stored.id.server_id().is_some() => {
                    info!("Replayed create: {} is now {}", record.id, stored.id);
                    Ok(Some((record.id, stored.id)))
                }
                _ => {
                    info!("Replayed create of {}", record.id);
                    Ok(None)
                }
            },
            Operation::Delete(id) => {
                let Some(server_id) = id.server_id() else {
                    debug!("Skipping delete of local-only entry {}", id);
                    return Ok(None);
                };
                match self.remote.delete(server_id).await? {
                    DeleteOutcome::Deleted => info!("Replayed delete of {}", id),
                    DeleteOutcome::AlreadyGone => info!("Entry {} already gone on server", id),
                }
                Ok(None)
            }
            Operation::Update(_) => Err(Error::InvalidInput(
                "update operations are not replayed".to_string(),
            )),
        }
    }
}
