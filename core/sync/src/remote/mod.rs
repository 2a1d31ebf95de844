//! Contract of the remote catalog API.

use async_trait::async_trait;

use stocksync_common::{Record, Result};

pub mod http;
pub mod memory;

pub use http::HttpCatalog;
pub use memory::MemoryCatalog;

/// Terminal outcome of a delete the orchestrator counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The server removed the record.
    Deleted,
    /// The server did not know the record (404); the end state holds anyway.
    AlreadyGone,
}

/// Remote source of truth for the catalog.
///
/// Failures are reported as `Error::Network` (unreachable, timeout) or
/// `Error::Http` (non-success status other than a delete 404).
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Fetch every record, in server order.
    async fn fetch_all(&self) -> Result<Vec<Record>>;

    /// Create a record. The id in `record` is ignored by the server.
    ///
    /// Any success status means the record is stored, whatever the body.
    ///
    /// # Returns
    /// The stored record with its server-assigned id, or `None` when the
    /// server acknowledged without a readable record.
    async fn create(&self, record: &Record) -> Result<Option<Record>>;

    /// Delete the record with the given server id.
    async fn delete(&self, id: i32) -> Result<DeleteOutcome>;
}
