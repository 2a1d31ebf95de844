//! Common utilities and types shared across StockSync crates.
//!
//! This module provides the error taxonomy and the catalog record model used
//! by storage, sync and the command-line client.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Record, RecordId};
