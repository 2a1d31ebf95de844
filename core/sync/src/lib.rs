//! StockSync offline-first sync engine
//!
//! This crate keeps a product catalog usable without a network:
//! - Connectivity tracking with change and reconnect notifications
//! - Durable write-ahead queue of pending creates and deletes
//! - Read-through cache of the last known server listing
//! - Ordered replay of queued writes when the server comes back

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod probe;
pub mod queue;
pub mod remote;
pub mod scheduler;

pub use cache::RecordCache;
pub use config::{ClientConfig, ProbeConfig};
pub use connectivity::{ConnectivityTracker, Subscription, Transition};
pub use engine::{CreateOutcome, RemoveOutcome, SyncOrchestrator, SyncReport};
pub use probe::{ConnectivityProbe, ProbeHandle};
pub use queue::{Operation, OperationId, OperationKind, OperationQueue, QueuedOperation};
pub use remote::{DeleteOutcome, HttpCatalog, MemoryCatalog, RemoteCatalog};
pub use scheduler::{ReplayScheduler, ReplaySchedulerHandle, ReplayTrigger};
