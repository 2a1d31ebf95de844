//! End-to-end offline behavior against an in-process catalog.

use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stocksync_common::{Error, Record, RecordId, Result};
use stocksync_storage::{DurableStore, KeyValueStore, MemoryStore};
use stocksync_sync::config::{DEFAULT_CACHE_KEY, DEFAULT_QUEUE_KEY};
use stocksync_sync::{
    ConnectivityTracker, DeleteOutcome, HttpCatalog, MemoryCatalog, Operation, RemoteCatalog,
    RemoveOutcome, ReplayScheduler, SyncOrchestrator,
};

/// Catalog that fails selected calls.
struct FlakyCatalog {
    inner: MemoryCatalog,
    failing_models: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<i32>>,
}

impl FlakyCatalog {
    fn new(inner: MemoryCatalog) -> Self {
        Self {
            inner,
            failing_models: Mutex::new(HashSet::new()),
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }

    fn fail_create_of(&self, model: &str) {
        self.failing_models.lock().unwrap().insert(model.to_string());
    }

    fn fail_delete_of(&self, id: i32) {
        self.failing_deletes.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl RemoteCatalog for FlakyCatalog {
    async fn fetch_all(&self) -> Result<Vec<Record>> {
        self.inner.fetch_all().await
    }

    async fn create(&self, record: &Record) -> Result<Option<Record>> {
        if self.failing_models.lock().unwrap().contains(&record.product_model) {
            return Err(Error::Network("connection reset".to_string()));
        }
        self.inner.create(record).await
    }

    async fn delete(&self, id: i32) -> Result<DeleteOutcome> {
        if self.failing_deletes.lock().unwrap().contains(&id) {
            return Err(Error::Network("connection reset".to_string()));
        }
        self.inner.delete(id).await
    }
}

/// Catalog whose creates wait until the test opens the gate.
struct GatedCatalog {
    inner: MemoryCatalog,
    gate: Semaphore,
    entered: Notify,
}

impl GatedCatalog {
    fn new() -> Self {
        Self {
            inner: MemoryCatalog::new(),
            gate: Semaphore::new(0),
            entered: Notify::new(),
        }
    }
}

#[async_trait]
impl RemoteCatalog for GatedCatalog {
    async fn fetch_all(&self) -> Result<Vec<Record>> {
        self.inner.fetch_all().await
    }

    async fn create(&self, record: &Record) -> Result<Option<Record>> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::Network("gate closed".to_string()))?;
        self.inner.create(record).await
    }

    async fn delete(&self, id: i32) -> Result<DeleteOutcome> {
        self.inner.delete(id).await
    }
}

/// Store whose writes to one key fail.
#[derive(Clone)]
struct FailingStore {
    inner: MemoryStore,
    failing_key: Arc<Mutex<Option<String>>>,
}

impl FailingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing_key: Arc::new(Mutex::new(None)),
        }
    }

    fn fail_writes_to(&self, key: &str) {
        *self.failing_key.lock().unwrap() = Some(key.to_string());
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        if self.failing_key.lock().unwrap().as_deref() == Some(key) {
            return Err(Error::Storage("disk full".to_string()));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }
}

fn entry(model: &str) -> Record {
    Record::new("John Doe", model, "WP-3000-BLK", 50, 299.99)
}

fn seeded(ids: &[i32]) -> MemoryCatalog {
    let records = ids
        .iter()
        .map(|&id| {
            let mut r = entry(&format!("Seed {}", id));
            r.id = RecordId::Server(id);
            r
        })
        .collect();
    MemoryCatalog::with_records(records)
}

fn orchestrator<R: RemoteCatalog + ?Sized>(
    remote: Arc<R>,
    online: bool,
    store: impl KeyValueStore + 'static,
) -> (SyncOrchestrator<R>, Arc<ConnectivityTracker>) {
    let tracker = Arc::new(ConnectivityTracker::with_initial(online));
    let sync = SyncOrchestrator::new(remote, tracker.clone(), DurableStore::new(store));
    (sync, tracker)
}

fn models(records: &[Record]) -> Vec<String> {
    let mut names: Vec<String> = records.iter().map(|r| r.product_model.clone()).collect();
    names.sort();
    names
}

#[tokio::test]
async fn offline_create_is_replayed_on_reconnect() {
    let remote = Arc::new(MemoryCatalog::new());
    let (sync, tracker) = orchestrator(remote.clone(), false, MemoryStore::new());
    let sync = Arc::new(sync);

    let (scheduler, handle) = ReplayScheduler::new(tracker.clone());
    let runner = sync.clone();
    let task = tokio::spawn(handle.run(move || {
        let runner = runner.clone();
        async move { runner.synchronize().await }
    }));

    let created = sync.create(entry("Widget")).await.unwrap();
    let placeholder = created.record().id;
    assert!(placeholder.is_pending());

    let offline = sync.fetch_all().await;
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0].id, placeholder);

    tracker.report(true);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !sync.pending_operations().await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let server = remote.records();
    assert_eq!(server.len(), 1);
    assert_eq!(server[0].product_model, "Widget");
    assert_eq!(server[0].part_number, "WP-3000-BLK");
    assert!(server[0].id.server_id().is_some());

    let online = sync.fetch_all().await;
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].id, server[0].id);
    assert!(online.iter().all(|r| !r.id.is_pending()));

    scheduler.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn offline_sequence_converges_after_sync() {
    let remote = Arc::new(seeded(&[1, 2, 3]));
    let (sync, tracker) = orchestrator(remote.clone(), true, MemoryStore::new());
    assert_eq!(sync.fetch_all().await.len(), 3);

    tracker.report(false);
    sync.create(entry("X")).await.unwrap();
    let y = sync.create(entry("Y")).await.unwrap();
    assert_eq!(
        sync.delete(RecordId::Server(2)).await.unwrap(),
        RemoveOutcome::Queued
    );
    assert_eq!(
        sync.delete(y.record().id).await.unwrap(),
        RemoveOutcome::Discarded
    );
    assert_eq!(sync.pending_operations().await.unwrap().len(), 2);
    assert_eq!(models(&sync.fetch_all().await), vec!["Seed 1", "Seed 3", "X"]);

    tracker.report(true);
    let report = sync.synchronize().await;
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);

    assert_eq!(models(&remote.records()), vec!["Seed 1", "Seed 3", "X"]);
    assert_eq!(models(&sync.fetch_all().await), vec!["Seed 1", "Seed 3", "X"]);
    assert!(sync.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn second_sync_on_empty_queue_is_noop() {
    let remote = Arc::new(MemoryCatalog::new());
    let memory = MemoryStore::new();
    let (sync, tracker) = orchestrator(remote.clone(), false, memory.clone());

    sync.create(entry("Widget")).await.unwrap();
    tracker.report(true);
    assert_eq!(sync.synchronize().await.succeeded, 1);

    let calls = remote.calls();
    let cache = memory.raw(DEFAULT_CACHE_KEY);

    let report = sync.synchronize().await;
    assert_eq!(report.attempted, 0);
    assert_eq!(remote.calls(), calls);
    assert_eq!(memory.raw(DEFAULT_CACHE_KEY), cache);
}

#[tokio::test]
async fn failed_create_stays_queued_while_delete_succeeds() {
    let remote = Arc::new(FlakyCatalog::new(seeded(&[7])));
    let (sync, tracker) = orchestrator(remote.clone(), true, MemoryStore::new());
    sync.fetch_all().await;

    tracker.report(false);
    let a = sync.create(entry("A")).await.unwrap();
    sync.delete(RecordId::Server(7)).await.unwrap();

    remote.fail_create_of("A");
    tracker.report(true);
    let report = sync.synchronize().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    let pending = sync.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(matches!(&pending[0].operation, Operation::Create(r) if r.product_model == "A"));

    let cached = sync.cached().await;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, a.record().id);
    assert!(remote.inner.records().is_empty());
}

#[tokio::test]
async fn failing_delete_does_not_block_later_entries() {
    let remote = Arc::new(FlakyCatalog::new(seeded(&[1, 2])));
    let (sync, tracker) = orchestrator(remote.clone(), false, MemoryStore::new());

    sync.delete(RecordId::Server(1)).await.unwrap();
    sync.delete(RecordId::Server(2)).await.unwrap();
    sync.create(entry("Later")).await.unwrap();

    remote.fail_delete_of(1);
    tracker.report(true);

    for _ in 0..3 {
        let report = sync.synchronize().await;
        assert_eq!(report.failed, 1);
    }

    let pending = sync.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, Operation::Delete(RecordId::Server(1)));
    assert_eq!(models(&remote.inner.records()), vec!["Later", "Seed 1"]);
}

#[tokio::test]
async fn queued_delete_of_missing_record_is_dropped() {
    let remote = Arc::new(MemoryCatalog::new());
    let (sync, tracker) = orchestrator(remote.clone(), false, MemoryStore::new());

    sync.delete(RecordId::Server(99)).await.unwrap();
    tracker.report(true);

    let report = sync.synchronize().await;
    assert_eq!(report.succeeded, 1);
    assert!(sync.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn direct_delete_not_found_matches_replay() {
    let remote = Arc::new(seeded(&[5]));
    let (sync, _tracker) = orchestrator(remote.clone(), true, MemoryStore::new());
    sync.fetch_all().await;

    // Someone else removed it in the meantime.
    remote.delete(5).await.unwrap();

    let outcome = sync.delete(RecordId::Server(5)).await.unwrap();
    assert_eq!(outcome, RemoveOutcome::Synced(DeleteOutcome::AlreadyGone));
    assert!(sync.cached().await.is_empty());
    assert!(sync.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn placeholder_delete_makes_no_calls() {
    let remote = Arc::new(MemoryCatalog::new());
    let (sync, tracker) = orchestrator(remote.clone(), false, MemoryStore::new());

    let created = sync.create(entry("Draft")).await.unwrap();
    tracker.report(true);

    sync.delete(created.record().id).await.unwrap();
    assert_eq!(remote.calls(), 0);
    assert!(sync.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn storage_failure_rejects_create() {
    let store = FailingStore::new(MemoryStore::new());
    let remote = Arc::new(MemoryCatalog::new());
    let (sync, _tracker) = orchestrator(remote, false, store.clone());

    store.fail_writes_to(DEFAULT_QUEUE_KEY);
    let err = sync.create(entry("Widget")).await.unwrap_err();
    assert!(err.is_storage());
    assert!(sync.cached().await.is_empty());
}

#[tokio::test]
async fn cache_failure_withdraws_queued_create() {
    let store = FailingStore::new(MemoryStore::new());
    let remote = Arc::new(MemoryCatalog::new());
    let (sync, _tracker) = orchestrator(remote, false, store.clone());

    store.fail_writes_to(DEFAULT_CACHE_KEY);
    assert!(sync.create(entry("Widget")).await.is_err());
    assert!(sync.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_queue_is_set_aside_and_writes_continue() {
    let memory = MemoryStore::new();
    memory
        .set(DEFAULT_QUEUE_KEY, "{not a queue".to_string())
        .await
        .unwrap();
    let remote = Arc::new(MemoryCatalog::new());
    let (sync, tracker) = orchestrator(remote.clone(), false, memory.clone());

    let created = sync.create(entry("Widget")).await.unwrap();
    assert!(created.is_queued());
    assert_eq!(
        sync.delete(RecordId::Server(3)).await.unwrap(),
        RemoveOutcome::Queued
    );

    let backup = format!("{}_corrupt", DEFAULT_QUEUE_KEY);
    assert_eq!(memory.raw(&backup).as_deref(), Some("{not a queue"));
    assert_eq!(sync.pending_operations().await.unwrap().len(), 2);

    tracker.report(true);
    let report = sync.synchronize().await;
    assert_eq!(report.succeeded, 2);
    assert_eq!(models(&remote.records()), vec!["Widget"]);
}

#[tokio::test]
async fn placeholder_delete_waits_for_replay_in_flight() {
    let remote = Arc::new(GatedCatalog::new());
    let (sync, tracker) = orchestrator(remote.clone(), false, MemoryStore::new());
    let sync = Arc::new(sync);

    let placeholder = sync.create(entry("Widget")).await.unwrap().record().id;
    tracker.report(true);

    let pass = tokio::spawn({
        let sync = sync.clone();
        async move { sync.synchronize().await }
    });
    remote.entered.notified().await;

    let delete = tokio::spawn({
        let sync = sync.clone();
        async move { sync.delete(placeholder).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!delete.is_finished());

    remote.gate.add_permits(1);
    assert_eq!(pass.await.unwrap().succeeded, 1);
    assert_eq!(
        delete.await.unwrap().unwrap(),
        RemoveOutcome::Synced(DeleteOutcome::Deleted)
    );

    assert!(remote.inner.records().is_empty());
    assert!(sync.pending_operations().await.unwrap().is_empty());
    assert!(sync.fetch_all().await.is_empty());
}

#[tokio::test]
async fn create_acknowledged_without_body_is_replayed_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ProductEntries"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ProductEntries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<Record>::new()))
        .mount(&server)
        .await;

    let remote = Arc::new(HttpCatalog::new(&format!("{}/api/ProductEntries", server.uri())).unwrap());
    let (sync, tracker) = orchestrator(remote, false, MemoryStore::new());
    sync.create(entry("Widget")).await.unwrap();

    tracker.report(true);
    let first = sync.synchronize().await;
    assert_eq!(first.succeeded, 1);
    assert_eq!(first.failed, 0);

    let second = sync.synchronize().await;
    assert_eq!(second.attempted, 0);
    assert!(sync.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn direct_create_without_body_is_not_queued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ProductEntries"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let remote = Arc::new(HttpCatalog::new(&format!("{}/api/ProductEntries", server.uri())).unwrap());
    let (sync, _tracker) = orchestrator(remote, true, MemoryStore::new());

    let outcome = sync.create(entry("Widget")).await.unwrap();
    assert!(!outcome.is_queued());
    assert_eq!(outcome.record().id, RecordId::Unassigned);
    assert_eq!(outcome.record().product_model, "Widget");
    assert!(sync.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let remote = Arc::new(MemoryCatalog::new());

    {
        let store = stocksync_storage::LocalStore::new(dir.path()).unwrap();
        let (sync, _tracker) = orchestrator(remote.clone(), false, store);
        sync.create(entry("Persisted")).await.unwrap();
    }

    let store = stocksync_storage::LocalStore::new(dir.path()).unwrap();
    let (sync, _tracker) = orchestrator(remote.clone(), true, store);
    assert_eq!(sync.pending_operations().await.unwrap().len(), 1);

    let report = sync.synchronize().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(models(&remote.records()), vec!["Persisted"]);
}

#[derive(Debug, Clone)]
enum Step {
    Create,
    DiscardDraft(usize),
    DeleteSeed(i32),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Create),
        any::<usize>().prop_map(Step::DiscardDraft),
        (1i32..=4).prop_map(Step::DeleteSeed),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn offline_steps_converge_on_server(steps in proptest::collection::vec(step(), 0..16)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let remote = Arc::new(seeded(&[1, 2, 3, 4]));
            let (sync, tracker) = orchestrator(remote.clone(), true, MemoryStore::new());
            sync.fetch_all().await;
            tracker.report(false);

            let mut expected: Vec<String> = (1..=4).map(|id| format!("Seed {}", id)).collect();
            let mut drafts: Vec<(RecordId, String)> = Vec::new();
            let mut made = 0;

            for step in &steps {
                match step {
                    Step::Create => {
                        made += 1;
                        let name = format!("Draft {}", made);
                        let created = sync.create(entry(&name)).await.unwrap();
                        assert!(created.is_queued());
                        drafts.push((created.record().id, name.clone()));
                        expected.push(name);
                    }
                    Step::DiscardDraft(pick) => {
                        if drafts.is_empty() {
                            continue;
                        }
                        let (id, name) = drafts.remove(pick % drafts.len());
                        assert_eq!(sync.delete(id).await.unwrap(), RemoveOutcome::Discarded);
                        expected.retain(|n| *n != name);
                    }
                    Step::DeleteSeed(id) => {
                        assert_eq!(
                            sync.delete(RecordId::Server(*id)).await.unwrap(),
                            RemoveOutcome::Queued
                        );
                        let name = format!("Seed {}", id);
                        expected.retain(|n| *n != name);
                    }
                }
            }
            expected.sort();

            tracker.report(true);
            let report = sync.synchronize().await;
            assert_eq!(report.failed, 0);
            assert!(sync.pending_operations().await.unwrap().is_empty());
            assert_eq!(models(&remote.records()), expected);
            assert_eq!(models(&sync.fetch_all().await), expected);
        });
    }
}
