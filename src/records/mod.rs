//! Worker records and their durable store.
//!
//! ## Contents
//! - [`WorkerRecord`], [`WorkerStatus`] the persisted shape of one worker
//! - [`RecordStore`] the persistence contract
//! - [`SqliteStore`] exclusive, file-backed implementation
//! - [`MemoryStore`] in-memory implementation for tests

mod memory;
mod record;
mod sqlite;
mod store;

pub use memory::MemoryStore;
pub use record::{WORKER_KIND, WorkerRecord, WorkerStatus, worker_id, worker_ordinal};
pub use sqlite::SqliteStore;
pub use store::RecordStore;
