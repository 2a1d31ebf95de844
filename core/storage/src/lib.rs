//! Durable local storage for StockSync.
//!
//! This module provides a trait-based interface for key-value backends
//! (in-memory, local filesystem) and a typed JSON wrapper on top of it.
//!
//! # Design Principles
//! - Flat string keys, whole-value replacement
//! - Async operations: All I/O operations are async
//! - Read failures are distinguishable from absence; callers decide
//!   whether to degrade

pub mod store;
pub mod memory;
pub mod local;
pub mod durable;

pub use store::{validate_key, KeyValueStore};
pub use memory::MemoryStore;
pub use local::LocalStore;
pub use durable::DurableStore;
